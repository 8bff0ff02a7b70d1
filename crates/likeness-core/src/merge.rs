//! Merge resolution and its reversal.
//!
//! A merge moves the evidence of one identity (the source) onto another (the
//! target) and soft-deletes the source. The source's own lists are never
//! cleared, which is what makes [`plan_undo`] possible: reversing a merge only
//! has to take the transferred entries back off the target and revive the
//! source.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
  Error, Result,
  face::{CooccurrenceIndex, FaceId, PhotoId},
  history::{HistoryAction, HistoryEvent, Stamp},
  identity::{FacesAdded, Identity, IdentityState, Lifecycle, MergeHistoryEntry},
  mutation::{MutationContext, normalize_name},
};

// ─── Request / outcome ───────────────────────────────────────────────────────

/// Input to [`crate::store::IdentityStore::merge`].
#[derive(Debug, Clone)]
pub struct MergeRequest {
  /// The identity the caller expects to survive.
  pub target_id:        Uuid,
  /// The identity the caller expects to be absorbed.
  pub source_id:        Uuid,
  pub actor:            String,
  /// Settles a name conflict. When supplied, the requested direction stands.
  pub resolved_name:    Option<String>,
  /// Optimistic check against the requested target's version.
  pub expected_version: Option<u64>,
}

impl MergeRequest {
  pub fn new(target_id: Uuid, source_id: Uuid, actor: impl Into<String>) -> Self {
    Self {
      target_id,
      source_id,
      actor: actor.into(),
      resolved_name: None,
      expected_version: None,
    }
  }

  pub fn resolving_name(mut self, name: impl Into<String>) -> Self {
    self.resolved_name = Some(name.into());
    self
  }
}

/// One side of a blocked merge, enough to render a resolution prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSide {
  pub identity_id: Uuid,
  pub name:        Option<String>,
  pub state:       IdentityState,
  pub face_count:  usize,
}

impl From<&Identity> for ConflictSide {
  fn from(identity: &Identity) -> Self {
    Self {
      identity_id: identity.identity_id,
      name:        identity.name.clone(),
      state:       identity.state,
      face_count:  identity.face_count(),
    }
  }
}

/// Both identities carry different names and no resolved name was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameConflict {
  pub target: ConflictSide,
  pub source: ConflictSide,
}

/// A completed merge as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedIdentity {
  /// The surviving identity after the merge.
  pub target:                   Identity,
  pub source_id:                Uuid,
  pub direction_auto_corrected: bool,
  pub faces_added:              FacesAdded,
}

/// Result of [`crate::store::IdentityStore::merge`]. A name conflict is a
/// recoverable outcome rather than an error: nothing was mutated and the
/// caller should resubmit with a resolved name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
  Merged(MergedIdentity),
  NameConflict(NameConflict),
}

// ─── Direction ───────────────────────────────────────────────────────────────

/// Why the survivor was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionRule {
  /// Exactly one side is named; it survives.
  NamedSide,
  /// The more trusted state survives.
  TrustRank,
  /// The side with more faces survives.
  FaceCount,
  /// Nothing distinguishes the sides; the request stands.
  AsRequested,
  /// A resolved name was supplied, so the request stands.
  Pinned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Direction {
  /// The requested source survives instead of the requested target.
  pub swapped: bool,
  pub rule:    DirectionRule,
}

fn names_match(a: &str, b: &str) -> bool {
  a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Decide which side survives. Returns `Err` with the conflict payload when
/// both sides carry distinct names and nothing pins the outcome.
pub fn resolve_direction(
  requested_target: &Identity,
  requested_source: &Identity,
  pinned: bool,
) -> Result<Direction, NameConflict> {
  let keep = |rule| Direction { swapped: false, rule };
  let swap = |rule| Direction { swapped: true, rule };

  if pinned {
    return Ok(keep(DirectionRule::Pinned));
  }

  match (&requested_target.name, &requested_source.name) {
    (Some(_), None) => return Ok(keep(DirectionRule::NamedSide)),
    (None, Some(_)) => return Ok(swap(DirectionRule::NamedSide)),
    (Some(t), Some(s)) if !names_match(t, s) => {
      return Err(NameConflict {
        target: requested_target.into(),
        source: requested_source.into(),
      });
    }
    _ => {}
  }

  let (t_rank, s_rank) = (
    requested_target.state.trust_rank(),
    requested_source.state.trust_rank(),
  );
  if t_rank != s_rank {
    return Ok(if t_rank > s_rank {
      keep(DirectionRule::TrustRank)
    } else {
      swap(DirectionRule::TrustRank)
    });
  }

  let (t_faces, s_faces) =
    (requested_target.face_count(), requested_source.face_count());
  if t_faces != s_faces {
    return Ok(if t_faces > s_faces {
      keep(DirectionRule::FaceCount)
    } else {
      swap(DirectionRule::FaceCount)
    });
  }

  Ok(keep(DirectionRule::AsRequested))
}

// ─── Co-occurrence ───────────────────────────────────────────────────────────

/// The first pair of faces, one from each identity, found in the same photo.
pub fn find_cooccurrence<P>(
  a: &Identity,
  b: &Identity,
  photos: &P,
) -> Option<(FaceId, FaceId, PhotoId)>
where
  P: CooccurrenceIndex + ?Sized,
{
  let b_photos: Vec<(&FaceId, BTreeSet<PhotoId>)> =
    b.faces().map(|f| (f, photos.photos_of(f))).collect();

  for face_a in a.faces() {
    let a_photos = photos.photos_of(face_a);
    for (face_b, b_set) in &b_photos {
      if let Some(photo) = a_photos.intersection(b_set).next() {
        return Some((face_a.clone(), (*face_b).clone(), photo.clone()));
      }
    }
  }
  None
}

// ─── Merge ───────────────────────────────────────────────────────────────────

/// Identities and the history event to persist for an applied merge.
#[derive(Debug, Clone)]
pub struct AppliedMerge {
  pub target:      Identity,
  pub source:      Identity,
  pub event:       HistoryEvent,
  pub direction:   Direction,
  pub faces_added: FacesAdded,
}

impl AppliedMerge {
  pub fn outcome(&self) -> MergeOutcome {
    MergeOutcome::Merged(MergedIdentity {
      target:                   self.target.clone(),
      source_id:                self.source.identity_id,
      direction_auto_corrected: self.direction.swapped,
      faces_added:              self.faces_added.clone(),
    })
  }
}

#[derive(Debug, Clone)]
pub enum MergePlan {
  Apply(Box<AppliedMerge>),
  Conflict(NameConflict),
}

/// Validate and apply a merge in memory.
///
/// `requested_target` and `requested_source` must be the records named by
/// `request.target_id` and `request.source_id`.
pub fn plan_merge<P>(
  requested_target: Identity,
  requested_source: Identity,
  request: &MergeRequest,
  photos: &P,
  stamp: &Stamp,
) -> Result<MergePlan>
where
  P: CooccurrenceIndex + ?Sized,
{
  if requested_target.identity_id == requested_source.identity_id {
    return Err(Error::InvalidPair(requested_target.identity_id));
  }
  let resolved_name = normalize_name(request.resolved_name.clone())?;

  requested_target.ensure_active()?;
  requested_source.ensure_active()?;
  requested_target.check_version(request.expected_version)?;

  if let Some((face_a, face_b, photo_id)) =
    find_cooccurrence(&requested_target, &requested_source, photos)
  {
    return Err(Error::CoOccurrence { face_a, face_b, photo_id });
  }

  let direction = match resolve_direction(
    &requested_target,
    &requested_source,
    resolved_name.is_some(),
  ) {
    Ok(direction) => direction,
    Err(conflict) => return Ok(MergePlan::Conflict(conflict)),
  };

  let (mut target, mut source) = if direction.swapped {
    (requested_source, requested_target)
  } else {
    (requested_target, requested_source)
  };

  let faces_added = transfer(&mut target, &source);

  source.lifecycle = Lifecycle::MergedInto { target: target.identity_id, at: stamp.at };
  source.touch(stamp.at);

  let prior_name = target.name.clone();
  let prior_state = target.state;
  target.state = target.state.promote(source.state);
  if let Some(name) = &resolved_name {
    target.name = Some(name.clone());
  }
  let previous = target.touch(stamp.at);

  let event = HistoryEvent::new(target.identity_id, HistoryAction::Merge, previous, stamp)
    .with_faces(
      faces_added
        .anchors
        .iter()
        .chain(faces_added.candidates.iter())
        .cloned(),
    )
    .with_metadata(json!({
      "source_identity_id":       source.identity_id,
      "faces_merged":             faces_added.face_count(),
      "direction_auto_corrected": direction.swapped,
      "direction_rule":           direction.rule,
      "requested_target_id":      request.target_id,
    }));

  target.merge_history.push(MergeHistoryEntry {
    merge_event_id: event.event_id,
    merged_at: stamp.at,
    merged_by: stamp.actor.clone(),
    source_id: source.identity_id,
    source_name: source.name.clone(),
    source_state: source.state,
    faces_added: faces_added.clone(),
    direction_auto_corrected: direction.swapped,
    prior_name,
    prior_state,
    resolved_name,
  });

  Ok(MergePlan::Apply(Box::new(AppliedMerge {
    target,
    source,
    event,
    direction,
    faces_added,
  })))
}

/// Append the source's lists onto the target, skipping entries the target
/// already holds. Returns exactly what was added.
fn transfer(target: &mut Identity, source: &Identity) -> FacesAdded {
  let mut added = FacesAdded::default();

  for face in &source.anchor_ids {
    if !target.holds_face(face) {
      target.anchor_ids.push(face.clone());
      added.anchors.push(face.clone());
    }
  }
  for face in &source.candidate_ids {
    if !target.holds_face(face) {
      target.candidate_ids.push(face.clone());
      added.candidates.push(face.clone());
    }
  }
  for negative in &source.negative_ids {
    let self_reference = matches!(
      negative,
      crate::identity::NegativeEntry::IdentityPair { identity_id }
        if *identity_id == target.identity_id
    );
    if !self_reference && !target.negative_ids.contains(negative) {
      target.negative_ids.push(negative.clone());
      added.negatives.push(negative.clone());
    }
  }

  added
}

// ─── Undo ────────────────────────────────────────────────────────────────────

/// The source named by the most recent merge on `target`.
pub fn undo_source(target: &Identity) -> Result<Uuid> {
  let entry = target
    .merge_history
    .last()
    .ok_or(Error::NoMergeHistory(target.identity_id))?;
  if let Some(merged_into) = target.merged_into() {
    return Err(Error::ChainDependency {
      identity_id: target.identity_id,
      merged_into: Some(merged_into),
    });
  }
  Ok(entry.source_id)
}

/// Identities and the history event to persist for an applied undo.
#[derive(Debug, Clone)]
pub struct AppliedUndo {
  pub target:  Identity,
  pub source:  Identity,
  pub event:   HistoryEvent,
  /// Transferred faces that were no longer on the target.
  pub missing: Vec<FaceId>,
}

/// Reverse the most recent merge on `target`.
///
/// `held_elsewhere` lists faces currently owned by active identities other
/// than these two (for example after a detach). Such faces are dropped from
/// the revived source so no face ends up in two active identities.
pub fn plan_undo(
  mut target: Identity,
  mut source: Identity,
  held_elsewhere: &BTreeSet<FaceId>,
  ctx: &MutationContext,
  stamp: &Stamp,
) -> Result<AppliedUndo> {
  let source_id = undo_source(&target)?;
  target.check_version(ctx.expected_version)?;
  if source.identity_id != source_id
    || source.merged_into() != Some(target.identity_id)
  {
    return Err(Error::ChainDependency {
      identity_id: source.identity_id,
      merged_into: source.merged_into(),
    });
  }

  let Some(entry) = target.merge_history.pop() else {
    return Err(Error::NoMergeHistory(target.identity_id));
  };

  let transferred: BTreeSet<&FaceId> = entry
    .faces_added
    .anchors
    .iter()
    .chain(entry.faces_added.candidates.iter())
    .collect();

  let missing: Vec<FaceId> = transferred
    .iter()
    .filter(|f| !target.holds_face(f))
    .map(|f| (*f).clone())
    .collect();

  let removed: Vec<FaceId> = transferred
    .iter()
    .filter(|f| target.holds_face(f))
    .map(|f| (*f).clone())
    .collect();
  target.anchor_ids.retain(|f| !transferred.contains(f));
  target.candidate_ids.retain(|f| !transferred.contains(f));
  target
    .negative_ids
    .retain(|n| !entry.faces_added.negatives.contains(n));

  let promoted = entry.prior_state.promote(entry.source_state);
  if target.state == promoted {
    target.state = entry.prior_state;
  }
  if entry.resolved_name.is_some() && target.name == entry.resolved_name {
    target.name = entry.prior_name.clone();
  }
  let previous = target.touch(stamp.at);

  let relocated: Vec<&FaceId> =
    missing.iter().filter(|f| held_elsewhere.contains(*f)).collect();
  source.anchor_ids.retain(|f| !relocated.contains(&f));
  source.candidate_ids.retain(|f| !relocated.contains(&f));
  source.lifecycle = Lifecycle::Active;
  source.touch(stamp.at);

  let event =
    HistoryEvent::new(target.identity_id, HistoryAction::UndoMerge, previous, stamp)
      .with_faces(removed.iter().cloned())
      .with_metadata(json!({
        "source_identity_id": source.identity_id,
        "merge_event_id":     entry.merge_event_id,
        "faces_removed":      removed.len(),
        "faces_missing":      missing,
      }));

  Ok(AppliedUndo { target, source, event, missing })
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::{
    face::{Face, FaceCatalog},
    identity::{NegativeEntry, Provenance},
  };

  fn face(id: &str, photo: &str) -> Face {
    Face {
      face_id:              id.into(),
      photo_id:             photo.into(),
      mean:                 vec![0.0; 4],
      uncertainty:          vec![],
      detection_confidence: 1.0,
      bbox:                 Default::default(),
    }
  }

  fn catalog() -> FaceCatalog {
    FaceCatalog::new([
      face("f1", "p1"),
      face("f2", "p2"),
      face("f3", "p3"),
      face("f4", "p4"),
      face("f5", "p1"),
    ])
  }

  fn identity(faces: &[&str], name: Option<&str>, state: IdentityState) -> Identity {
    let mut id = Identity::new(
      faces.iter().map(|f| FaceId::from(*f)).collect(),
      Provenance::Manual { created_by: "t".into() },
      Utc::now(),
    );
    id.name = name.map(str::to_owned);
    id.state = state;
    id
  }

  fn applied(plan: MergePlan) -> AppliedMerge {
    match plan {
      MergePlan::Apply(applied) => *applied,
      MergePlan::Conflict(c) => panic!("unexpected conflict: {c:?}"),
    }
  }

  #[test]
  fn named_confirmed_side_survives_even_when_passed_as_source() {
    let a = identity(&["f1", "f2"], None, IdentityState::Inbox);
    let b = identity(&["f3"], Some("Jane Doe"), IdentityState::Confirmed);
    let request = MergeRequest::new(a.identity_id, b.identity_id, "reviewer");

    let out = applied(
      plan_merge(a.clone(), b.clone(), &request, &catalog(), &Stamp::now("reviewer"))
        .unwrap(),
    );

    assert_eq!(out.target.identity_id, b.identity_id);
    assert_eq!(out.target.name.as_deref(), Some("Jane Doe"));
    assert_eq!(out.target.state, IdentityState::Confirmed);
    let faces: BTreeSet<_> = out.target.faces().cloned().collect();
    assert_eq!(faces, ["f1", "f2", "f3"].into_iter().map(FaceId::from).collect());
    assert!(out.direction.swapped);
    assert_eq!(out.direction.rule, DirectionRule::NamedSide);

    let entry = out.target.merge_history.last().unwrap();
    assert!(entry.direction_auto_corrected);
    assert_eq!(entry.source_id, a.identity_id);
    assert_eq!(entry.merge_event_id, out.event.event_id);

    // Source is soft-deleted but keeps its own faces.
    assert_eq!(out.source.merged_into(), Some(b.identity_id));
    assert_eq!(out.source.anchor_ids, a.anchor_ids);
  }

  #[test]
  fn distinct_names_block_without_resolution() {
    let a = identity(&["f1"], Some("Morris Mazal"), IdentityState::Confirmed);
    let b = identity(&["f2", "f3"], Some("Maurice Mazal"), IdentityState::Confirmed);
    let request = MergeRequest::new(a.identity_id, b.identity_id, "reviewer");

    let plan =
      plan_merge(a.clone(), b.clone(), &request, &catalog(), &Stamp::now("reviewer"))
        .unwrap();
    let MergePlan::Conflict(conflict) = plan else {
      panic!("expected a name conflict");
    };
    assert_eq!(conflict.target.name.as_deref(), Some("Morris Mazal"));
    assert_eq!(conflict.source.name.as_deref(), Some("Maurice Mazal"));
    assert_eq!(conflict.target.face_count, 1);
    assert_eq!(conflict.source.face_count, 2);

    let resolved = request.resolving_name("Morris Mazal");
    let out =
      applied(plan_merge(a, b, &resolved, &catalog(), &Stamp::now("reviewer")).unwrap());
    assert_eq!(out.target.name.as_deref(), Some("Morris Mazal"));
    assert!(!out.direction.swapped);
  }

  #[test]
  fn same_name_in_different_case_is_not_a_conflict() {
    let a = identity(&["f1"], Some("jane doe"), IdentityState::Inbox);
    let b = identity(&["f2"], Some("Jane Doe"), IdentityState::Confirmed);
    let request = MergeRequest::new(a.identity_id, b.identity_id, "reviewer");
    let out =
      applied(plan_merge(a, b.clone(), &request, &catalog(), &Stamp::now("r")).unwrap());
    assert_eq!(out.target.identity_id, b.identity_id);
    assert_eq!(out.direction.rule, DirectionRule::TrustRank);
  }

  #[test]
  fn cooccurrence_is_absolute() {
    // f1 and f5 share photo p1.
    let a = identity(&["f1"], Some("Jane Doe"), IdentityState::Confirmed);
    let b = identity(&["f5"], None, IdentityState::Inbox);
    let request = MergeRequest::new(a.identity_id, b.identity_id, "r")
      .resolving_name("Jane Doe");
    let err = plan_merge(a, b, &request, &catalog(), &Stamp::now("r")).unwrap_err();
    assert!(matches!(
      err,
      Error::CoOccurrence { ref photo_id, .. } if photo_id == &PhotoId::from("p1")
    ));
  }

  #[test]
  fn already_merged_source_is_refused() {
    let a = identity(&["f1"], None, IdentityState::Inbox);
    let mut b = identity(&["f2"], None, IdentityState::Inbox);
    b.lifecycle = Lifecycle::MergedInto { target: Uuid::new_v4(), at: Utc::now() };
    let request = MergeRequest::new(a.identity_id, b.identity_id, "r");
    let err = plan_merge(a, b, &request, &catalog(), &Stamp::now("r")).unwrap_err();
    assert!(matches!(err, Error::AlreadyMerged { .. }));
  }

  #[test]
  fn direction_falls_back_to_face_count_then_request() {
    let small = identity(&["f1"], None, IdentityState::Inbox);
    let large = identity(&["f2", "f3"], None, IdentityState::Inbox);
    let d = resolve_direction(&small, &large, false).unwrap();
    assert!(d.swapped);
    assert_eq!(d.rule, DirectionRule::FaceCount);

    let other = identity(&["f4"], None, IdentityState::Inbox);
    let d = resolve_direction(&small, &other, false).unwrap();
    assert!(!d.swapped);
    assert_eq!(d.rule, DirectionRule::AsRequested);

    let skipped = identity(&["f2", "f3"], None, IdentityState::Skipped);
    let d = resolve_direction(&skipped, &small, false).unwrap();
    assert!(d.swapped);
    assert_eq!(d.rule, DirectionRule::TrustRank);
  }

  #[test]
  fn promotion_never_demotes_target() {
    let a = identity(&["f1", "f2"], None, IdentityState::Proposed);
    let b = identity(&["f3"], None, IdentityState::Skipped);
    let request = MergeRequest::new(a.identity_id, b.identity_id, "r");
    let out = applied(plan_merge(a, b, &request, &catalog(), &Stamp::now("r")).unwrap());
    assert_eq!(out.target.state, IdentityState::Proposed);
  }

  #[test]
  fn negatives_transfer_without_self_reference() {
    let a = identity(&["f1", "f2"], None, IdentityState::Inbox);
    let mut b = identity(&["f3"], None, IdentityState::Inbox);
    let stranger = Uuid::new_v4();
    b.negative_ids = vec![
      NegativeEntry::IdentityPair { identity_id: a.identity_id },
      NegativeEntry::IdentityPair { identity_id: stranger },
      NegativeEntry::Face { face_id: "f9".into() },
    ];
    let request = MergeRequest::new(a.identity_id, b.identity_id, "r");
    let out = applied(plan_merge(a, b, &request, &catalog(), &Stamp::now("r")).unwrap());
    assert_eq!(out.faces_added.negatives.len(), 2);
    assert!(!out.target.pair_negatives().any(|id| id == out.target.identity_id));
  }

  #[test]
  fn undo_round_trip_restores_lists_state_and_name() {
    let a = identity(&["f1"], Some("Alpha"), IdentityState::Confirmed);
    let b = identity(&["f2", "f3"], Some("Beta"), IdentityState::Inbox);
    let before = b.clone();
    let request =
      MergeRequest::new(b.identity_id, a.identity_id, "r").resolving_name("Gamma");
    let merged = applied(
      plan_merge(b, a.clone(), &request, &catalog(), &Stamp::now("r")).unwrap(),
    );
    assert_eq!(merged.target.state, IdentityState::Confirmed);

    let undone = plan_undo(
      merged.target,
      merged.source,
      &BTreeSet::new(),
      &MutationContext::new("r"),
      &Stamp::now("r"),
    )
    .unwrap();

    assert_eq!(undone.target.anchor_ids, before.anchor_ids);
    assert_eq!(undone.target.candidate_ids, before.candidate_ids);
    assert_eq!(undone.target.negative_ids, before.negative_ids);
    assert_eq!(undone.target.state, IdentityState::Inbox);
    assert_eq!(undone.target.name.as_deref(), Some("Beta"));
    assert!(undone.target.merge_history.is_empty());
    assert!(undone.source.is_active());
    assert_eq!(undone.source.name.as_deref(), Some("Alpha"));
    assert_eq!(undone.source.state, IdentityState::Confirmed);
    assert_eq!(undone.source.anchor_ids, a.anchor_ids);
    assert_eq!(undone.event.action, HistoryAction::UndoMerge);
  }

  #[test]
  fn undo_tolerates_detached_face() {
    let a = identity(&["f1", "f4"], None, IdentityState::Inbox);
    let b = identity(&["f2", "f3"], None, IdentityState::Inbox);
    let request = MergeRequest::new(b.identity_id, a.identity_id, "r");
    let mut merged =
      applied(plan_merge(b, a, &request, &catalog(), &Stamp::now("r")).unwrap());

    // f4 was detached from the target after the merge.
    merged.target.anchor_ids.retain(|f| f.as_str() != "f4");
    let held = BTreeSet::from([FaceId::from("f4")]);

    let undone = plan_undo(
      merged.target,
      merged.source,
      &held,
      &MutationContext::new("r"),
      &Stamp::now("r"),
    )
    .unwrap();

    assert_eq!(undone.missing, vec![FaceId::from("f4")]);
    assert!(!undone.target.holds_face(&"f1".into()));
    assert_eq!(undone.source.anchor_ids, vec![FaceId::from("f1")]);
  }

  #[test]
  fn undo_without_history_fails() {
    let a = identity(&["f1"], None, IdentityState::Inbox);
    assert!(matches!(undo_source(&a), Err(Error::NoMergeHistory(_))));
  }
}
