//! JSON REST API for the likeness identity registry.
//!
//! Exposes an axum [`Router`] backed by any
//! [`likeness_core::store::IdentityStore`]. Authentication is the caller's
//! responsibility: the outer layer must insert an [`Actor`] extension into
//! every request, and handlers that mutate refuse requests without one.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", likeness_api::api_router(state))
//! ```

pub mod actor;
pub mod error;
pub mod identities;
pub mod ingest;
pub mod matching;
pub mod merge;
pub mod search;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use likeness_core::{face::FaceCatalog, matcher::MatchConfig, store::IdentityStore};

pub use actor::Actor;
pub use error::ApiError;

/// Shared handler state.
pub struct ApiState<S> {
  pub store:    Arc<S>,
  /// Embeddings and photo membership of every known face.
  pub faces:    Arc<FaceCatalog>,
  pub matching: MatchConfig,
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self {
      store:    Arc::clone(&self.store),
      faces:    Arc::clone(&self.faces),
      matching: self.matching,
    }
  }
}

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: ApiState<S>) -> Router<()>
where
  S: IdentityStore + 'static,
{
  Router::new()
    // Registry
    .route(
      "/identities",
      get(identities::list::<S>).post(identities::create::<S>),
    )
    .route("/identities/{id}", get(identities::get_one::<S>))
    .route(
      "/identities/{id}/transitions/{transition}",
      post(identities::transition::<S>),
    )
    .route("/identities/{id}/rename", post(identities::rename::<S>))
    .route("/identities/{id}/detach", post(identities::detach::<S>))
    .route(
      "/identities/{id}/candidates/review",
      post(identities::review_candidate::<S>),
    )
    .route("/identities/{id}/reject-pair", post(identities::reject_pair::<S>))
    .route(
      "/identities/{id}/unreject-pair",
      post(identities::unreject_pair::<S>),
    )
    .route("/identities/{id}/history", get(identities::history_of::<S>))
    .route("/history", get(identities::history_all::<S>))
    // Merge
    .route("/merge", post(merge::merge::<S>))
    .route("/identities/{id}/undo-merge", post(merge::undo::<S>))
    // Matching
    .route("/identities/{id}/neighbors", get(matching::neighbors::<S>))
    .route("/faces/{face_id}/similar", get(matching::similar_faces::<S>))
    // Search and ingestion
    .route("/search", get(search::handler::<S>))
    .route("/ingest", post(ingest::handler::<S>))
    .with_state(state)
}
