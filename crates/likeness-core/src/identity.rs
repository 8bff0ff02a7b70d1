//! Identity: the durable answer to "who is this person".
//!
//! An identity owns references to faces, never the faces themselves. Records
//! are never physically removed: absorption by a merge flips the
//! [`Lifecycle`] to [`Lifecycle::MergedInto`] and leaves every other field in
//! place so the merge can be reversed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{Error, Result, face::FaceId};

// ─── State ───────────────────────────────────────────────────────────────────

/// Review state of an identity.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
  IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityState {
  Inbox,
  Proposed,
  Confirmed,
  Contested,
  Rejected,
  Skipped,
}

impl IdentityState {
  /// Ordering used for merge direction and state promotion. Higher is more
  /// trusted.
  pub fn trust_rank(self) -> u8 {
    match self {
      Self::Confirmed => 5,
      Self::Proposed => 4,
      Self::Contested => 3,
      Self::Inbox => 2,
      Self::Skipped => 1,
      Self::Rejected => 0,
    }
  }

  /// The more trusted of two states.
  pub fn promote(self, other: Self) -> Self {
    if other.trust_rank() > self.trust_rank() { other } else { self }
  }
}

// ─── Negatives ───────────────────────────────────────────────────────────────

/// A "this is not the same person" memory held by an identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NegativeEntry {
  /// A specific face rejected from this identity.
  Face { face_id: FaceId },
  /// Another identity judged to be a different person.
  IdentityPair { identity_id: Uuid },
}

// ─── Provenance ──────────────────────────────────────────────────────────────

/// How an identity came into existence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
  /// Created directly by a reviewer.
  Manual { created_by: String },
  /// Seeded by the ingestion grouper.
  AutoGrouped {
    batch_id: Uuid,
    /// Free-text label of the upload or import batch.
    source:   Option<String>,
  },
  /// Split off another identity by a detach.
  Detached { from: Uuid, by: String },
}

// ─── Lifecycle ───────────────────────────────────────────────────────────────

/// Whether the identity is live or has been absorbed by a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Lifecycle {
  #[default]
  Active,
  MergedInto {
    target: Uuid,
    at:     DateTime<Utc>,
  },
}

// ─── Merge history ───────────────────────────────────────────────────────────

/// Entries transferred by one merge, split by list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacesAdded {
  pub anchors:    Vec<FaceId>,
  pub candidates: Vec<FaceId>,
  pub negatives:  Vec<NegativeEntry>,
}

impl FacesAdded {
  /// Number of faces (anchors and candidates) moved by the merge.
  pub fn face_count(&self) -> usize {
    self.anchors.len() + self.candidates.len()
  }
}

/// The reversal record kept on a merge target. Newest entries are last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeHistoryEntry {
  /// The `MERGE` history event this entry summarises.
  pub merge_event_id:           Uuid,
  pub merged_at:                DateTime<Utc>,
  pub merged_by:                String,
  pub source_id:                Uuid,
  /// The source's name as captured at merge time.
  pub source_name:              Option<String>,
  /// The source's state as captured at merge time.
  pub source_state:             IdentityState,
  pub faces_added:              FacesAdded,
  pub direction_auto_corrected: bool,
  pub prior_name:               Option<String>,
  pub prior_state:              IdentityState,
  /// Name supplied to settle a name conflict, if any.
  pub resolved_name:            Option<String>,
}

// ─── Identity ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
  pub identity_id:   Uuid,
  pub name:          Option<String>,
  pub state:         IdentityState,
  /// Faces confirmed as this person.
  pub anchor_ids:    Vec<FaceId>,
  /// Suggested, unconfirmed faces.
  pub candidate_ids: Vec<FaceId>,
  pub negative_ids:  Vec<NegativeEntry>,
  /// Bumped by exactly one on every field-changing mutation.
  pub version_id:    u64,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
  pub provenance:    Provenance,
  #[serde(default)]
  pub lifecycle:     Lifecycle,
  #[serde(default)]
  pub merge_history: Vec<MergeHistoryEntry>,
}

impl Identity {
  /// A fresh `INBOX` identity at version 1.
  pub fn new(
    anchor_ids: Vec<FaceId>,
    provenance: Provenance,
    at: DateTime<Utc>,
  ) -> Self {
    Self {
      identity_id: Uuid::new_v4(),
      name: None,
      state: IdentityState::Inbox,
      anchor_ids,
      candidate_ids: Vec::new(),
      negative_ids: Vec::new(),
      version_id: 1,
      created_at: at,
      updated_at: at,
      provenance,
      lifecycle: Lifecycle::Active,
      merge_history: Vec::new(),
    }
  }

  pub fn is_active(&self) -> bool { matches!(self.lifecycle, Lifecycle::Active) }

  pub fn merged_into(&self) -> Option<Uuid> {
    match self.lifecycle {
      Lifecycle::Active => None,
      Lifecycle::MergedInto { target, .. } => Some(target),
    }
  }

  /// Anchors followed by candidates, i.e. the faces that participate in matching.
  pub fn faces(&self) -> impl Iterator<Item = &FaceId> {
    self.anchor_ids.iter().chain(self.candidate_ids.iter())
  }

  pub fn face_count(&self) -> usize {
    self.anchor_ids.len() + self.candidate_ids.len()
  }

  pub fn holds_face(&self, face_id: &FaceId) -> bool {
    self.faces().any(|f| f == face_id)
  }

  /// Individually rejected faces.
  pub fn face_negatives(&self) -> impl Iterator<Item = &FaceId> {
    self.negative_ids.iter().filter_map(|n| match n {
      NegativeEntry::Face { face_id } => Some(face_id),
      NegativeEntry::IdentityPair { .. } => None,
    })
  }

  /// Identities recorded as a different person.
  pub fn pair_negatives(&self) -> impl Iterator<Item = Uuid> + '_ {
    self.negative_ids.iter().filter_map(|n| match n {
      NegativeEntry::IdentityPair { identity_id } => Some(*identity_id),
      NegativeEntry::Face { .. } => None,
    })
  }

  /// Fail with [`Error::AlreadyMerged`] if this identity is soft-deleted.
  pub fn ensure_active(&self) -> Result<()> {
    match self.lifecycle {
      Lifecycle::Active => Ok(()),
      Lifecycle::MergedInto { target, .. } => Err(Error::AlreadyMerged {
        identity_id: self.identity_id,
        merged_into: target,
      }),
    }
  }

  /// Compare against a caller-supplied version for optimistic concurrency.
  pub fn check_version(&self, expected: Option<u64>) -> Result<()> {
    match expected {
      Some(expected) if expected != self.version_id => {
        Err(Error::VersionConflict {
          identity_id: self.identity_id,
          expected,
          actual: self.version_id,
        })
      }
      _ => Ok(()),
    }
  }

  /// Record a field-changing mutation. Returns the previous version.
  pub fn touch(&mut self, at: DateTime<Utc>) -> u64 {
    let previous = self.version_id;
    self.version_id += 1;
    self.updated_at = at;
    previous
  }
}
