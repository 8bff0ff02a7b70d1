//! Single-identity registry mutations.
//!
//! Each function validates, applies the change to an in-memory [`Identity`],
//! bumps its version and returns the history event(s) to append. Storage
//! backends run these inside one write transaction so a failure leaves the
//! stored records untouched.

use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::{Display, EnumString};

use crate::{
  Error, Result,
  face::FaceId,
  history::{HistoryAction, HistoryEvent, Stamp},
  identity::{Identity, IdentityState, NegativeEntry, Provenance},
};

// ─── Context ─────────────────────────────────────────────────────────────────

/// Caller-supplied parameters shared by all mutations.
#[derive(Debug, Clone)]
pub struct MutationContext {
  /// The reviewer performing the change; recorded on history events.
  pub actor:            String,
  /// If set, the mutation fails unless the identity is at this version.
  pub expected_version: Option<u64>,
}

impl MutationContext {
  pub fn new(actor: impl Into<String>) -> Self {
    Self { actor: actor.into(), expected_version: None }
  }

  pub fn expecting(mut self, version: u64) -> Self {
    self.expected_version = Some(version);
    self
  }

  pub fn stamp(&self) -> Stamp { Stamp::now(self.actor.clone()) }

  /// Common preconditions: the identity is live and at the expected version.
  pub fn check(&self, identity: &Identity) -> Result<()> {
    identity.ensure_active()?;
    identity.check_version(self.expected_version)
  }
}

// ─── Creation ────────────────────────────────────────────────────────────────

/// Input to [`crate::store::IdentityStore::create_identity`].
#[derive(Debug, Clone)]
pub struct NewIdentity {
  /// Seeded as anchors.
  pub faces:      Vec<FaceId>,
  /// Unconfirmed suggestions, reviewed later with [`review_candidate`].
  pub candidates: Vec<FaceId>,
  pub name:       Option<String>,
  pub provenance: Provenance,
  /// Confidence weight recorded on the `CREATE` event.
  pub weight:     f32,
  /// Recorded on the `CREATE` event.
  pub actor:      String,
}

impl NewIdentity {
  /// A reviewer-created identity.
  pub fn manual(faces: Vec<FaceId>, actor: impl Into<String>) -> Self {
    let actor = actor.into();
    Self {
      faces,
      candidates: Vec::new(),
      name: None,
      provenance: Provenance::Manual { created_by: actor.clone() },
      weight: crate::history::REVIEWER_WEIGHT,
      actor,
    }
  }

  /// A provisional identity seeded by the ingestion grouper.
  pub fn auto_grouped(
    faces: Vec<FaceId>,
    batch_id: uuid::Uuid,
    source: Option<String>,
    actor: impl Into<String>,
  ) -> Self {
    Self {
      faces,
      candidates: Vec::new(),
      name: None,
      provenance: Provenance::AutoGrouped { batch_id, source },
      weight: crate::history::AUTO_GROUP_WEIGHT,
      actor: actor.into(),
    }
  }

  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn with_candidates(mut self, candidates: Vec<FaceId>) -> Self {
    self.candidates = candidates;
    self
  }
}

/// Build a new `INBOX` identity and its `CREATE` event.
pub fn create(input: NewIdentity, stamp: &Stamp) -> Result<(Identity, HistoryEvent)> {
  let mut faces: Vec<FaceId> = Vec::with_capacity(input.faces.len());
  for face in input.faces {
    if !faces.contains(&face) {
      faces.push(face);
    }
  }
  if faces.is_empty() {
    return Err(Error::EmptyIdentity);
  }
  let mut candidates: Vec<FaceId> = Vec::new();
  for face in input.candidates {
    if !faces.contains(&face) && !candidates.contains(&face) {
      candidates.push(face);
    }
  }

  let mut identity = Identity::new(faces, input.provenance, stamp.at);
  identity.candidate_ids = candidates;
  identity.name = normalize_name(input.name)?;

  let event = HistoryEvent::new(identity.identity_id, HistoryAction::Create, 0, stamp)
    .with_faces(identity.faces().cloned())
    .with_weight(input.weight)
    .with_metadata(json!({ "provenance": identity.provenance }));

  Ok((identity, event))
}

/// Fail if any of `faces` is already held by one of the `active` identities.
pub fn ensure_unassigned<'a>(
  faces: &[FaceId],
  active: impl IntoIterator<Item = &'a Identity>,
) -> Result<()> {
  for identity in active {
    if !identity.is_active() {
      continue;
    }
    if let Some(face_id) = faces.iter().find(|f| identity.holds_face(f)) {
      return Err(Error::FaceAlreadyAssigned {
        face_id:     face_id.clone(),
        identity_id: identity.identity_id,
      });
    }
  }
  Ok(())
}

// ─── State transitions ───────────────────────────────────────────────────────

/// A reviewer-driven state change.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Transition {
  Confirm,
  Reject,
  Skip,
  /// Return a skipped or rejected identity to the inbox.
  Reset,
  Propose,
  Contest,
}

impl Transition {
  pub fn target_state(self) -> IdentityState {
    match self {
      Self::Confirm => IdentityState::Confirmed,
      Self::Reject => IdentityState::Rejected,
      Self::Skip => IdentityState::Skipped,
      Self::Reset => IdentityState::Inbox,
      Self::Propose => IdentityState::Proposed,
      Self::Contest => IdentityState::Contested,
    }
  }

  pub fn action(self) -> HistoryAction {
    match self {
      Self::Confirm => HistoryAction::Confirm,
      Self::Reject => HistoryAction::Reject,
      Self::Skip => HistoryAction::Skip,
      Self::Reset => HistoryAction::Reset,
      Self::Propose => HistoryAction::Propose,
      Self::Contest => HistoryAction::Contest,
    }
  }

  fn allowed_from(self, from: IdentityState) -> bool {
    use IdentityState::*;
    match self {
      Self::Confirm => matches!(from, Inbox | Proposed | Contested | Skipped),
      Self::Reject => from != Rejected,
      Self::Skip => from != Skipped,
      Self::Reset => matches!(from, Skipped | Rejected),
      Self::Propose => matches!(from, Inbox | Contested),
      Self::Contest => matches!(from, Confirmed | Proposed),
    }
  }
}

pub fn transition(
  identity: &mut Identity,
  transition: Transition,
  ctx: &MutationContext,
  stamp: &Stamp,
) -> Result<HistoryEvent> {
  ctx.check(identity)?;

  let from = identity.state;
  let to = transition.target_state();
  if !transition.allowed_from(from) {
    return Err(Error::InvalidTransition { from, to });
  }

  identity.state = to;
  let previous = identity.touch(stamp.at);

  Ok(
    HistoryEvent::new(identity.identity_id, transition.action(), previous, stamp)
      .with_metadata(json!({ "from": from, "to": to })),
  )
}

// ─── Rename ──────────────────────────────────────────────────────────────────

/// Trim a proposed name; blank names are rejected rather than stored.
pub fn normalize_name(name: Option<String>) -> Result<Option<String>> {
  match name {
    None => Ok(None),
    Some(n) => {
      let trimmed = n.trim();
      if trimmed.is_empty() {
        Err(Error::InvalidName)
      } else {
        Ok(Some(trimmed.to_owned()))
      }
    }
  }
}

/// Set or clear (`None`) the display name.
pub fn rename(
  identity: &mut Identity,
  name: Option<String>,
  ctx: &MutationContext,
  stamp: &Stamp,
) -> Result<HistoryEvent> {
  ctx.check(identity)?;

  let name = normalize_name(name)?;
  let old = std::mem::replace(&mut identity.name, name);
  let previous = identity.touch(stamp.at);

  Ok(
    HistoryEvent::new(identity.identity_id, HistoryAction::Rename, previous, stamp)
      .with_metadata(json!({ "from": old, "to": identity.name })),
  )
}

// ─── Detach ──────────────────────────────────────────────────────────────────

/// The result of splitting one face off an identity.
#[derive(Debug, Clone)]
pub struct Detached {
  pub source:   Identity,
  pub detached: Identity,
  pub events:   [HistoryEvent; 2],
}

/// Remove `face_id` from every list on `source` and seed a new `INBOX`
/// identity holding only that face. The total face count is preserved.
pub fn detach(
  mut source: Identity,
  face_id: &FaceId,
  ctx: &MutationContext,
  stamp: &Stamp,
) -> Result<Detached> {
  ctx.check(&source)?;

  if !source.holds_face(face_id) {
    return Err(Error::InvalidFace {
      identity_id: source.identity_id,
      face_id:     face_id.clone(),
    });
  }
  if source.face_count() == 1 {
    // Detaching the last face would leave an empty identity behind.
    return Err(Error::InvalidFace {
      identity_id: source.identity_id,
      face_id:     face_id.clone(),
    });
  }

  source.anchor_ids.retain(|f| f != face_id);
  source.candidate_ids.retain(|f| f != face_id);
  source
    .negative_ids
    .retain(|n| !matches!(n, NegativeEntry::Face { face_id: f } if f == face_id));
  let previous = source.touch(stamp.at);

  let detached = Identity::new(
    vec![face_id.clone()],
    Provenance::Detached { from: source.identity_id, by: stamp.actor.clone() },
    stamp.at,
  );

  let detach_event =
    HistoryEvent::new(source.identity_id, HistoryAction::Detach, previous, stamp)
      .with_faces([face_id.clone()])
      .with_metadata(json!({ "new_identity_id": detached.identity_id }));
  let create_event =
    HistoryEvent::new(detached.identity_id, HistoryAction::Create, 0, stamp)
      .with_faces([face_id.clone()])
      .with_metadata(json!({ "detached_from": source.identity_id }));

  Ok(Detached { source, detached, events: [detach_event, create_event] })
}

// ─── Candidate review ────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CandidateVerdict {
  /// Promote the candidate to an anchor.
  Accept,
  /// Move the candidate to the negative list.
  Reject,
}

pub fn review_candidate(
  identity: &mut Identity,
  face_id: &FaceId,
  verdict: CandidateVerdict,
  ctx: &MutationContext,
  stamp: &Stamp,
) -> Result<HistoryEvent> {
  ctx.check(identity)?;

  let Some(pos) = identity.candidate_ids.iter().position(|f| f == face_id) else {
    return Err(Error::InvalidFace {
      identity_id: identity.identity_id,
      face_id:     face_id.clone(),
    });
  };
  let face = identity.candidate_ids.remove(pos);

  let action = match verdict {
    CandidateVerdict::Accept => {
      identity.anchor_ids.push(face);
      HistoryAction::AcceptCandidate
    }
    CandidateVerdict::Reject => {
      identity.negative_ids.push(NegativeEntry::Face { face_id: face });
      HistoryAction::RejectCandidate
    }
  };
  let previous = identity.touch(stamp.at);

  Ok(
    HistoryEvent::new(identity.identity_id, action, previous, stamp)
      .with_faces([face_id.clone()]),
  )
}
