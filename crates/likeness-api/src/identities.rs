//! Handlers for `/identities` and `/history` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/identities` | Optional `?state=INBOX&include_merged=true&include_rejected=true` |
//! | `POST` | `/identities` | Body: `{"faces":[..],"candidates":[..],"name":..}` |
//! | `GET`  | `/identities/{id}` | 404 if not found; merged identities are returned |
//! | `POST` | `/identities/{id}/transitions/{transition}` | `confirm`, `reject`, `skip`, `reset`, `propose`, `contest` |
//! | `POST` | `/identities/{id}/rename` | Body: `{"name":"Ada"}`; `null` clears |
//! | `POST` | `/identities/{id}/detach` | Body: `{"face_id":".."}` |
//! | `POST` | `/identities/{id}/candidates/review` | Body: `{"face_id":"..","verdict":"accept"}` |
//! | `POST` | `/identities/{id}/reject-pair` | Body: `{"other_id":".."}` |
//! | `POST` | `/identities/{id}/unreject-pair` | Body: `{"other_id":".."}` |
//! | `GET`  | `/identities/{id}/history` | Events touching one identity |
//! | `GET`  | `/history` | The whole log, oldest first |
//!
//! Every mutating endpoint accepts an optional `?expected_version=<n>` for
//! optimistic concurrency.

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use likeness_core::{
  Error as CoreError,
  face::FaceId,
  history::HistoryEvent,
  identity::Identity,
  mutation::{CandidateVerdict, MutationContext, NewIdentity, Transition},
  store::{IdentityQuery, IdentityStore},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiState, actor::Actor, error::ApiError};

/// Optimistic-concurrency guard shared by every mutating endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct VersionParams {
  pub expected_version: Option<u64>,
}

impl VersionParams {
  pub fn context(&self, actor: Actor) -> MutationContext {
    MutationContext { actor: actor.0, expected_version: self.expected_version }
  }
}

/// Two identities touched by one call, e.g. a detach or a pair rejection.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityPair {
  pub first:  Identity,
  pub second: Identity,
}

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /identities[?state=<STATE>&include_merged=<bool>&include_rejected=<bool>]`
pub async fn list<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Query(query): Query<IdentityQuery>,
) -> Result<Json<Vec<Identity>>, ApiError> {
  let identities = state
    .store
    .list_identities(query)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(identities))
}

// ─── Create ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub faces:      Vec<FaceId>,
  #[serde(default)]
  pub candidates: Vec<FaceId>,
  #[serde(default)]
  pub name:       Option<String>,
}

/// `POST /identities`
pub async fn create<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  actor: Actor,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  if let Some(missing) = body
    .faces
    .iter()
    .chain(&body.candidates)
    .find(|f| !state.faces.contains(f))
  {
    return Err(CoreError::FaceNotFound(missing.clone()).into());
  }

  let mut input =
    NewIdentity::manual(body.faces, actor.0).with_candidates(body.candidates);
  input.name = body.name;

  let identity = state
    .store
    .create_identity(input)
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(identity)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /identities/{id}`
pub async fn get_one<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Identity>, ApiError> {
  state
    .store
    .get_identity(id)
    .await
    .map_err(ApiError::store)?
    .map(Json)
    .ok_or_else(|| CoreError::IdentityNotFound(id).into())
}

// ─── Review ───────────────────────────────────────────────────────────────────

/// `POST /identities/{id}/transitions/{transition}`
pub async fn transition<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path((id, transition)): Path<(Uuid, Transition)>,
  Query(version): Query<VersionParams>,
  actor: Actor,
) -> Result<Json<Identity>, ApiError> {
  let identity = state
    .store
    .transition(id, transition, version.context(actor))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(identity))
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
  pub name: Option<String>,
}

/// `POST /identities/{id}/rename`
pub async fn rename<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Query(version): Query<VersionParams>,
  actor: Actor,
  Json(body): Json<RenameBody>,
) -> Result<Json<Identity>, ApiError> {
  let identity = state
    .store
    .rename(id, body.name, version.context(actor))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(identity))
}

// ─── Faces ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FaceBody {
  pub face_id: FaceId,
}

/// `POST /identities/{id}/detach`
///
/// Responds `201` with `{"first": <source>, "second": <new identity>}`.
pub async fn detach<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Query(version): Query<VersionParams>,
  actor: Actor,
  Json(body): Json<FaceBody>,
) -> Result<impl IntoResponse, ApiError> {
  let (first, second) = state
    .store
    .detach_face(id, body.face_id, version.context(actor))
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(IdentityPair { first, second })))
}

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
  pub face_id: FaceId,
  pub verdict: CandidateVerdict,
}

/// `POST /identities/{id}/candidates/review`
pub async fn review_candidate<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Query(version): Query<VersionParams>,
  actor: Actor,
  Json(body): Json<ReviewBody>,
) -> Result<Json<Identity>, ApiError> {
  let identity = state
    .store
    .review_candidate(id, body.face_id, body.verdict, version.context(actor))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(identity))
}

// ─── Rejection memory ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PairBody {
  pub other_id: Uuid,
}

/// `POST /identities/{id}/reject-pair`
pub async fn reject_pair<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Query(version): Query<VersionParams>,
  actor: Actor,
  Json(body): Json<PairBody>,
) -> Result<Json<IdentityPair>, ApiError> {
  let (first, second) = state
    .store
    .reject_pair(id, body.other_id, version.context(actor))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(IdentityPair { first, second }))
}

/// `POST /identities/{id}/unreject-pair`
pub async fn unreject_pair<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
  Query(version): Query<VersionParams>,
  actor: Actor,
  Json(body): Json<PairBody>,
) -> Result<Json<IdentityPair>, ApiError> {
  let (first, second) = state
    .store
    .unreject_pair(id, body.other_id, version.context(actor))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(IdentityPair { first, second }))
}

// ─── History ──────────────────────────────────────────────────────────────────

/// `GET /identities/{id}/history`
pub async fn history_of<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<HistoryEvent>>, ApiError> {
  if state
    .store
    .get_identity(id)
    .await
    .map_err(ApiError::store)?
    .is_none()
  {
    return Err(CoreError::IdentityNotFound(id).into());
  }
  let events = state
    .store
    .history(Some(id))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(events))
}

/// `GET /history`
pub async fn history_all<S: IdentityStore>(
  State(state): State<ApiState<S>>,
) -> Result<Json<Vec<HistoryEvent>>, ApiError> {
  let events = state.store.history(None).await.map_err(ApiError::store)?;
  Ok(Json(events))
}
