//! Handlers for nearest-neighbor queries.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/identities/{id}/neighbors` | Optional `?k=<n>` |
//! | `GET`  | `/faces/{face_id}/similar` | Optional `?k=<n>` |
//!
//! Scoring is CPU-bound, so it runs on the blocking pool.

use axum::{
  Json,
  extract::{Path, Query, State},
};
use likeness_core::{
  face::FaceId,
  matcher::{self, FaceNeighbor, IdentityNeighbor},
  store::{IdentityQuery, IdentityStore},
};
use serde::Deserialize;
use tokio::task;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct NeighborParams {
  pub k: Option<usize>,
}

/// `GET /identities/{id}/neighbors[?k=<n>]`
pub async fn neighbors<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Query(params): Query<NeighborParams>,
) -> Result<Json<Vec<IdentityNeighbor>>, ApiError> {
  // Merged identities are included so a merged query reports where it went.
  let identities = state
    .store
    .list_identities(IdentityQuery {
      include_merged:   true,
      include_rejected: true,
      state:            None,
    })
    .await
    .map_err(ApiError::store)?;
  let k = params.k.unwrap_or(state.matching.default_k);
  let thresholds = state.matching.thresholds();
  let faces = state.faces.clone();

  let result = task::spawn_blocking(move || {
    matcher::find_neighbors(&identities, id, k, &*faces, &*faces, &thresholds)
  })
  .await
  .map_err(|e| ApiError::Internal(e.to_string()))?;

  Ok(Json(result?))
}

/// `GET /faces/{face_id}/similar[?k=<n>]`
pub async fn similar_faces<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(face_id): Path<FaceId>,
  Query(params): Query<NeighborParams>,
) -> Result<Json<Vec<FaceNeighbor>>, ApiError> {
  let identities = state
    .store
    .list_identities(IdentityQuery::holders())
    .await
    .map_err(ApiError::store)?;
  let k = params.k.unwrap_or(state.matching.default_k);
  let thresholds = state.matching.thresholds();
  let faces = state.faces.clone();

  let result = task::spawn_blocking(move || {
    matcher::find_similar_faces(&identities, &face_id, k, &*faces, &*faces, &thresholds)
  })
  .await
  .map_err(|e| ApiError::Internal(e.to_string()))?;

  Ok(Json(result?))
}
