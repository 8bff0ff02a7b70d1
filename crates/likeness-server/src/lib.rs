//! HTTP server for the likeness identity registry.
//!
//! Wraps [`likeness_api::api_router`] with Basic authentication and request
//! tracing, and owns the runtime configuration.

pub mod auth;

#[cfg(test)]
mod tests;

use std::{path::PathBuf, sync::Arc};

use anyhow::ensure;
use axum::{Router, middleware};
use likeness_api::{ApiState, api_router};
use likeness_core::{matcher::MatchConfig, search::NameVariants, store::IdentityStore};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use auth::{AuthConfig, require_auth};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Extra spellings to treat as interchangeable in name search, one
/// `[[name_variants]]` table per group.
#[derive(Debug, Deserialize, Clone)]
pub struct VariantGroup {
  pub names: Vec<String>,
}

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  pub host:               String,
  pub port:               u16,
  pub store_path:         PathBuf,
  /// JSON array of faces with embeddings and photo ids.
  pub faces_path:         PathBuf,
  pub auth_username:      String,
  pub auth_password_hash: String,
  #[serde(default)]
  pub matching:           MatchConfig,
  #[serde(default)]
  pub name_variants:      Vec<VariantGroup>,
}

impl ServerConfig {
  /// Reject threshold settings the matcher and grouper cannot work with.
  pub fn validate(&self) -> anyhow::Result<()> {
    let m = &self.matching;
    ensure!(
      0.0 < m.very_high && m.very_high <= m.high && m.high <= m.moderate,
      "matching tiers must satisfy 0 < very_high <= high <= moderate \
       (got {} / {} / {})",
      m.very_high,
      m.high,
      m.moderate
    );
    // Grouping must be stricter than the tightest matcher tier.
    ensure!(
      m.grouping_threshold > 0.0 && m.grouping_threshold < m.very_high,
      "matching.grouping_threshold ({}) must be positive and below matching.very_high ({})",
      m.grouping_threshold,
      m.very_high
    );
    ensure!(m.default_k > 0, "matching.default_k must be at least 1");
    Ok(())
  }

  /// The built-in variant table extended with the configured groups.
  pub fn name_variants(&self) -> NameVariants {
    let mut table = NameVariants::builtin();
    table.extend(self.name_variants.iter().map(|g| g.names.iter()));
    table
  }

  pub fn auth(&self) -> AuthConfig {
    AuthConfig {
      username:      self.auth_username.clone(),
      password_hash: self.auth_password_hash.clone(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the server router: the JSON API under `/api`, behind Basic auth.
pub fn router<S>(state: ApiState<S>, auth: Arc<AuthConfig>) -> Router
where
  S: IdentityStore + 'static,
{
  Router::new()
    .nest("/api", api_router(state))
    .layer(middleware::from_fn_with_state(auth, require_auth))
    .layer(TraceLayer::new_for_http())
}
