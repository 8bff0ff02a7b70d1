//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every failure is answered with a JSON body
//! `{ "error": <kind>, "message": <text>, "details": <object|null> }` so the
//! presentation layer can branch on `error` without parsing messages.

use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use likeness_core::{Error as CoreError, StoreError};
use serde_json::{Value, json};
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("unauthorized")]
  Unauthorized,

  #[error("{0}")]
  Store(Box<dyn StoreError>),

  #[error("internal error: {0}")]
  Internal(String),
}

impl ApiError {
  pub fn store<E: StoreError>(e: E) -> Self { Self::Store(Box::new(e)) }
}

impl From<CoreError> for ApiError {
  fn from(e: CoreError) -> Self { Self::store(e) }
}

fn status_of(e: &CoreError) -> StatusCode {
  match e {
    CoreError::IdentityNotFound(_) | CoreError::FaceNotFound(_) => {
      StatusCode::NOT_FOUND
    }
    CoreError::AlreadyMerged { .. }
    | CoreError::CoOccurrence { .. }
    | CoreError::NameConflict(_)
    | CoreError::VersionConflict { .. }
    | CoreError::ChainDependency { .. }
    | CoreError::FaceAlreadyAssigned { .. } => StatusCode::CONFLICT,
    CoreError::NoMergeHistory(_)
    | CoreError::InvalidFace { .. }
    | CoreError::InvalidTransition { .. }
    | CoreError::InvalidName
    | CoreError::InvalidPair(_)
    | CoreError::EmptyIdentity => StatusCode::UNPROCESSABLE_ENTITY,
    CoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

fn details_of(e: &CoreError) -> Value {
  match e {
    CoreError::IdentityNotFound(id)
    | CoreError::NoMergeHistory(id)
    | CoreError::InvalidPair(id) => json!({ "identity_id": id }),
    CoreError::FaceNotFound(face_id) => json!({ "face_id": face_id }),
    CoreError::AlreadyMerged { identity_id, merged_into } => {
      json!({ "identity_id": identity_id, "merged_into": merged_into })
    }
    CoreError::CoOccurrence { face_a, face_b, photo_id } => {
      json!({ "face_a": face_a, "face_b": face_b, "photo_id": photo_id })
    }
    CoreError::NameConflict(conflict) => json!(conflict),
    CoreError::ChainDependency { identity_id, merged_into } => {
      json!({ "identity_id": identity_id, "merged_into": merged_into })
    }
    CoreError::InvalidFace { identity_id, face_id }
    | CoreError::FaceAlreadyAssigned { face_id, identity_id } => {
      json!({ "identity_id": identity_id, "face_id": face_id })
    }
    CoreError::InvalidTransition { from, to } => json!({ "from": from, "to": to }),
    CoreError::VersionConflict { identity_id, expected, actual } => json!({
      "identity_id": identity_id,
      "expected": expected,
      "actual": actual,
    }),
    CoreError::InvalidName | CoreError::EmptyIdentity | CoreError::Serialization(_) => {
      Value::Null
    }
  }
}

fn body(status: StatusCode, kind: &str, message: String, details: Value) -> Response {
  (
    status,
    Json(json!({ "error": kind, "message": message, "details": details })),
  )
    .into_response()
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let message = self.to_string();
    match self {
      ApiError::Unauthorized => {
        let mut res = body(StatusCode::UNAUTHORIZED, "unauthorized", message, Value::Null);
        res.headers_mut().insert(
          header::WWW_AUTHENTICATE,
          HeaderValue::from_static("Basic realm=\"likeness\""),
        );
        res
      }
      ApiError::Store(e) => match e.as_core() {
        Some(core) => body(status_of(core), core.kind(), message, details_of(core)),
        None => body(StatusCode::INTERNAL_SERVER_ERROR, "store", message, Value::Null),
      },
      ApiError::Internal(_) => {
        body(StatusCode::INTERNAL_SERVER_ERROR, "internal", message, Value::Null)
      }
    }
  }
}
