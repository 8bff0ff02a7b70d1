//! The authenticated caller, as recorded in history events.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

/// Name of the authenticated caller.
///
/// Inserted into request extensions by the server's auth layer and
/// extracted by every mutating handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    _state: &S,
  ) -> Result<Self, Self::Rejection> {
    parts
      .extensions
      .get::<Actor>()
      .cloned()
      .ok_or(ApiError::Unauthorized)
  }
}
