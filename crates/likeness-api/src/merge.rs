//! Handlers for merging identities and undoing merges.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/merge` | Body: `{"target_id":..,"source_id":..,"resolved_name":..,"expected_version":..}` |
//! | `POST` | `/identities/{id}/undo-merge` | Optional `?expected_version=<n>` |
//!
//! A blocked merge answers `409` with `error: "name_conflict"` and both
//! sides in `details`; resubmitting with `resolved_name` settles it.

use axum::{
  Json,
  extract::{Path, Query, State},
};
use likeness_core::{
  Error as CoreError,
  identity::Identity,
  merge::{MergeOutcome, MergeRequest},
  store::IdentityStore,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
  ApiState,
  actor::Actor,
  error::ApiError,
  identities::VersionParams,
};

#[derive(Debug, Deserialize)]
pub struct MergeBody {
  pub target_id:        Uuid,
  pub source_id:        Uuid,
  #[serde(default)]
  pub resolved_name:    Option<String>,
  #[serde(default)]
  pub expected_version: Option<u64>,
}

/// `POST /merge`
///
/// The response carries the surviving identity, which may be the requested
/// source when the direction was corrected.
pub async fn merge<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  actor: Actor,
  Json(body): Json<MergeBody>,
) -> Result<Json<MergeOutcome>, ApiError> {
  let request = MergeRequest {
    target_id:        body.target_id,
    source_id:        body.source_id,
    actor:            actor.0,
    resolved_name:    body.resolved_name,
    expected_version: body.expected_version,
  };

  match state.store.merge(request).await.map_err(ApiError::store)? {
    MergeOutcome::NameConflict(conflict) => {
      Err(CoreError::NameConflict(Box::new(conflict)).into())
    }
    merged => Ok(Json(merged)),
  }
}

/// `POST /identities/{id}/undo-merge`
pub async fn undo<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Query(version): Query<VersionParams>,
  actor: Actor,
) -> Result<Json<Identity>, ApiError> {
  let identity = state
    .store
    .undo_merge(id, version.context(actor))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(identity))
}
