//! Handler for `GET /search`.
//!
//! Query parameters:
//! - `q`: the name query; blank queries return no hits
//! - `expand_variants`: match heritage spellings (default `true`)

use axum::{
  Json,
  extract::{Query, State},
};
use likeness_core::{search::SearchHit, store::IdentityStore};
use serde::Deserialize;

use crate::{ApiState, error::ApiError};

fn default_expand() -> bool { true }

#[derive(Debug, Deserialize)]
pub struct SearchParams {
  #[serde(default)]
  pub q:               String,
  #[serde(default = "default_expand")]
  pub expand_variants: bool,
}

/// `GET /search?q=<text>[&expand_variants=false]`
pub async fn handler<S: IdentityStore>(
  State(state): State<ApiState<S>>,
  Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
  let hits = state
    .store
    .search_identities(&params.q, params.expand_variants)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(hits))
}
