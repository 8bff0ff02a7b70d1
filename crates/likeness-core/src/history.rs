//! The global history log.
//!
//! History events are written once and never edited or removed. The
//! per-identity `merge_history` is a prunable summary derived from them; this
//! log is the forensic record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::face::FaceId;

/// Weight recorded for actions taken by a human reviewer.
pub const REVIEWER_WEIGHT: f32 = 1.0;

/// Weight recorded for identities seeded by automatic grouping.
pub const AUTO_GROUP_WEIGHT: f32 = 0.5;

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
pub enum HistoryAction {
  Create,
  Confirm,
  Reject,
  Skip,
  Reset,
  Propose,
  Contest,
  Rename,
  Detach,
  AcceptCandidate,
  RejectCandidate,
  RejectPair,
  UnrejectPair,
  Merge,
  UndoMerge,
}

/// One immutable entry in the global history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
  pub event_id:            Uuid,
  pub recorded_at:         DateTime<Utc>,
  /// The identity this event belongs to.
  pub identity_id:         Uuid,
  pub action:              HistoryAction,
  pub face_ids:            Vec<FaceId>,
  pub confidence_weight:   f32,
  /// `version_id` of the identity before this event was applied.
  pub previous_version_id: u64,
  pub actor:               String,
  /// Action-specific details.
  #[serde(default)]
  pub metadata:            serde_json::Value,
}

impl HistoryEvent {
  pub fn new(
    identity_id: Uuid,
    action: HistoryAction,
    previous_version_id: u64,
    stamp: &Stamp,
  ) -> Self {
    Self {
      event_id: Uuid::new_v4(),
      recorded_at: stamp.at,
      identity_id,
      action,
      face_ids: Vec::new(),
      confidence_weight: REVIEWER_WEIGHT,
      previous_version_id,
      actor: stamp.actor.clone(),
      metadata: serde_json::Value::Null,
    }
  }

  pub fn with_faces(mut self, face_ids: impl IntoIterator<Item = FaceId>) -> Self {
    self.face_ids = face_ids.into_iter().collect();
    self
  }

  pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
    self.metadata = metadata;
    self
  }

  pub fn with_weight(mut self, weight: f32) -> Self {
    self.confidence_weight = weight;
    self
  }
}

/// Who is acting and when. Shared by every event produced by one operation.
#[derive(Debug, Clone)]
pub struct Stamp {
  pub actor: String,
  pub at:    DateTime<Utc>,
}

impl Stamp {
  pub fn now(actor: impl Into<String>) -> Self {
    Self { actor: actor.into(), at: Utc::now() }
  }
}
