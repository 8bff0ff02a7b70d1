//! Error types for `likeness-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::{
  face::{FaceId, PhotoId},
  identity::IdentityState,
  merge::NameConflict,
};

#[derive(Debug, Error)]
pub enum Error {
  #[error("identity not found: {0}")]
  IdentityNotFound(Uuid),

  #[error("face not found: {0}")]
  FaceNotFound(FaceId),

  #[error("identity {identity_id} is already merged into {merged_into}")]
  AlreadyMerged {
    identity_id: Uuid,
    merged_into: Uuid,
  },

  /// Two faces appear in the same photo, so their identities are provably
  /// different people. Never overridable.
  #[error("faces {face_a} and {face_b} both appear in photo {photo_id}")]
  CoOccurrence {
    face_a:   FaceId,
    face_b:   FaceId,
    photo_id: PhotoId,
  },

  /// A blocked merge as reported at the API boundary. The store returns it
  /// as `MergeOutcome::NameConflict` instead, since nothing was written.
  #[error("identities {} and {} carry different names; a resolved name is required", .0.target.identity_id, .0.source.identity_id)]
  NameConflict(Box<NameConflict>),

  #[error("identity {0} has no merge to undo")]
  NoMergeHistory(Uuid),

  /// The merge being undone is no longer the last hop for `identity_id`.
  #[error("cannot undo: identity {identity_id} has moved since the merge (now merged into {merged_into:?})")]
  ChainDependency {
    identity_id: Uuid,
    merged_into: Option<Uuid>,
  },

  #[error("face {face_id} is not part of identity {identity_id}")]
  InvalidFace {
    identity_id: Uuid,
    face_id:     FaceId,
  },

  #[error("face {face_id} already belongs to active identity {identity_id}")]
  FaceAlreadyAssigned {
    face_id:     FaceId,
    identity_id: Uuid,
  },

  #[error("cannot transition from {from} to {to}")]
  InvalidTransition {
    from: IdentityState,
    to:   IdentityState,
  },

  #[error("identity names must not be blank")]
  InvalidName,

  #[error("an identity cannot be paired with itself: {0}")]
  InvalidPair(Uuid),

  #[error("an identity needs at least one face")]
  EmptyIdentity,

  #[error("version conflict on {identity_id}: expected {expected}, found {actual}")]
  VersionConflict {
    identity_id: Uuid,
    expected:    u64,
    actual:      u64,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Stable machine-readable tag for this failure, used by API bodies.
  pub fn kind(&self) -> &'static str {
    match self {
      Self::IdentityNotFound(_) => "not_found",
      Self::FaceNotFound(_) => "face_not_found",
      Self::AlreadyMerged { .. } => "already_merged",
      Self::CoOccurrence { .. } => "co_occurrence",
      Self::NameConflict(_) => "name_conflict",
      Self::NoMergeHistory(_) => "no_merge_history",
      Self::ChainDependency { .. } => "chain_dependency",
      Self::InvalidFace { .. } => "invalid_face",
      Self::FaceAlreadyAssigned { .. } => "face_already_assigned",
      Self::InvalidTransition { .. } => "invalid_transition",
      Self::InvalidName => "invalid_name",
      Self::InvalidPair(_) => "invalid_pair",
      Self::EmptyIdentity => "empty_identity",
      Self::VersionConflict { .. } => "version_conflict",
      Self::Serialization(_) => "serialization",
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Implemented by storage-backend error types so higher layers can recover
/// the domain failure behind a backend error.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// The domain error wrapped by this backend error, if there is one.
  fn as_core(&self) -> Option<&Error>;
}

impl StoreError for Error {
  fn as_core(&self) -> Option<&Error> { Some(self) }
}
