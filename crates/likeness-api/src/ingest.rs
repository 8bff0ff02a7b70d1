//! Handler for `POST /ingest`.
//!
//! Body: `{"faces":["f1","f2",..],"source":"upload 2024-03"}`. Every face
//! must be present in the face catalog. Responds `201` with the batch report.

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::IntoResponse,
};
use likeness_core::{
  Error as CoreError,
  ingest::{self, IngestRequest},
  store::IdentityStore,
};

use crate::{ApiState, actor::Actor, error::ApiError};

/// `POST /ingest`
pub async fn handler<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  actor: Actor,
  Json(request): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
  if let Some(missing) = request.faces.iter().find(|f| !state.faces.contains(f)) {
    return Err(CoreError::FaceNotFound(missing.clone()).into());
  }

  let report = ingest::ingest(
    &*state.store,
    &*state.faces,
    &*state.faces,
    request,
    state.matching.grouping_threshold,
    &actor.0,
  )
  .await
  .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(report)))
}
