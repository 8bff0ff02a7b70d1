//! The `IdentityStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `likeness-store-sqlite`).
//! The API layer depends on this abstraction, not on any concrete backend.

use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  face::FaceId,
  history::HistoryEvent,
  identity::{Identity, IdentityState},
  merge::{MergeOutcome, MergeRequest},
  mutation::{CandidateVerdict, MutationContext, NewIdentity, Transition},
  search::SearchHit,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`IdentityStore::list_identities`].
///
/// The default query returns live identities only: neither merged away nor
/// `REJECTED`. Asking for `state: Some(Rejected)` returns rejected ones
/// without setting `include_rejected`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityQuery {
  /// Include soft-deleted (merged) identities.
  pub include_merged:   bool,
  /// Include `REJECTED` identities when no state filter is given.
  pub include_rejected: bool,
  /// Restrict to a single review state.
  pub state:            Option<IdentityState>,
}

impl IdentityQuery {
  /// Every identity that still holds its faces, rejected ones included.
  pub fn holders() -> Self {
    Self { include_rejected: true, ..Self::default() }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an identity registry backend.
///
/// Every mutation is all-or-nothing: it validates, writes every touched
/// identity and appends its history events in one atomic step, or changes
/// nothing. Returned identities are owned copies; the store alone holds the
/// authoritative state.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait IdentityStore: Send + Sync {
  type Error: crate::StoreError;

  // ── Registry ──────────────────────────────────────────────────────────

  /// Persist a new `INBOX` identity. Fails if any face already belongs to an
  /// active identity.
  fn create_identity(
    &self,
    input: NewIdentity,
  ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + '_;

  /// Persist several identities in one transaction. Either all are created or
  /// none is.
  fn create_identities(
    &self,
    inputs: Vec<NewIdentity>,
  ) -> impl Future<Output = Result<Vec<Identity>, Self::Error>> + Send + '_;

  /// Retrieve an identity, soft-deleted or not. Returns `None` if unknown.
  fn get_identity(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send + '_;

  /// List identities ordered by creation time.
  fn list_identities(
    &self,
    query: IdentityQuery,
  ) -> impl Future<Output = Result<Vec<Identity>, Self::Error>> + Send + '_;

  /// Rank active identities by name match. See [`crate::search::rank`].
  fn search_identities<'a>(
    &'a self,
    query: &'a str,
    expand_variants: bool,
  ) -> impl Future<Output = Result<Vec<SearchHit>, Self::Error>> + Send + 'a;

  // ── Single-identity mutations ─────────────────────────────────────────

  /// Apply a review state change.
  fn transition(
    &self,
    id: Uuid,
    transition: Transition,
    ctx: MutationContext,
  ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + '_;

  /// Set or clear the display name.
  fn rename(
    &self,
    id: Uuid,
    name: Option<String>,
    ctx: MutationContext,
  ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + '_;

  /// Split one face off into a new `INBOX` identity. Returns the updated
  /// source and the new identity.
  fn detach_face(
    &self,
    id: Uuid,
    face_id: FaceId,
    ctx: MutationContext,
  ) -> impl Future<Output = Result<(Identity, Identity), Self::Error>> + Send + '_;

  /// Accept a candidate as an anchor or reject it into the negatives.
  fn review_candidate(
    &self,
    id: Uuid,
    face_id: FaceId,
    verdict: CandidateVerdict,
    ctx: MutationContext,
  ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + '_;

  // ── Rejection memory ──────────────────────────────────────────────────

  /// Record on both identities that they are different people.
  /// `ctx.expected_version` applies to `a`.
  fn reject_pair(
    &self,
    a: Uuid,
    b: Uuid,
    ctx: MutationContext,
  ) -> impl Future<Output = Result<(Identity, Identity), Self::Error>> + Send + '_;

  /// Remove a pair rejection from both identities.
  fn unreject_pair(
    &self,
    a: Uuid,
    b: Uuid,
    ctx: MutationContext,
  ) -> impl Future<Output = Result<(Identity, Identity), Self::Error>> + Send + '_;

  // ── Merge and undo ────────────────────────────────────────────────────

  /// Merge two identities. A name conflict is returned as
  /// [`MergeOutcome::NameConflict`] with nothing written.
  fn merge(
    &self,
    request: MergeRequest,
  ) -> impl Future<Output = Result<MergeOutcome, Self::Error>> + Send + '_;

  /// Reverse the most recent merge into `id`. Returns the updated target.
  fn undo_merge(
    &self,
    id: Uuid,
    ctx: MutationContext,
  ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + '_;

  // ── History ───────────────────────────────────────────────────────────

  /// Read the global history log oldest first, optionally for one identity.
  fn history(
    &self,
    identity_id: Option<Uuid>,
  ) -> impl Future<Output = Result<Vec<HistoryEvent>, Self::Error>> + Send + '_;
}
