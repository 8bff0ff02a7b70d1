//! End-to-end router tests: authentication in front of the JSON API.

use std::{path::PathBuf, sync::Arc};

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::{
  Router,
  body::{Body, to_bytes},
  http::{Method, Request, StatusCode, header},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use likeness_api::ApiState;
use likeness_core::{
  face::{Face, FaceCatalog},
  matcher::MatchConfig,
};
use likeness_store_sqlite::SqliteStore;
use rand_core::OsRng;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::{ServerConfig, VariantGroup, router};

fn config(password: &str) -> ServerConfig {
  let salt = SaltString::generate(&mut OsRng);
  let hash = Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .unwrap()
    .to_string();

  ServerConfig {
    host:               "127.0.0.1".to_string(),
    port:               8640,
    store_path:         PathBuf::from(":memory:"),
    faces_path:         PathBuf::from("faces.json"),
    auth_username:      "archivist".to_string(),
    auth_password_hash: hash,
    matching:           MatchConfig::default(),
    name_variants:      vec![],
  }
}

async fn app(config: &ServerConfig) -> Router {
  let faces = Arc::new(FaceCatalog::new([Face {
    face_id:              "f1".into(),
    photo_id:             "p1".into(),
    mean:                 vec![0.0, 0.0],
    uncertainty:          vec![],
    detection_confidence: 1.0,
    bbox:                 Default::default(),
  }]));
  let store = SqliteStore::open_in_memory(faces.clone())
    .await
    .unwrap()
    .with_name_variants(config.name_variants());
  let state = ApiState {
    store: Arc::new(store),
    faces,
    matching: config.matching,
  };
  router(state, Arc::new(config.auth()))
}

fn basic(user: &str, pass: &str) -> String {
  format!("Basic {}", B64.encode(format!("{user}:{pass}")))
}

async fn body_json(response: axum::response::Response) -> Value {
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn requests_without_credentials_are_refused() {
  let cfg = config("secret");
  let app = app(&cfg).await;

  let request = Request::builder()
    .uri("/api/identities")
    .body(Body::empty())
    .unwrap();
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
  assert_eq!(body_json(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn wrong_password_is_refused() {
  let cfg = config("secret");
  let app = app(&cfg).await;

  let request = Request::builder()
    .uri("/api/identities")
    .header(header::AUTHORIZATION, basic("archivist", "nope"))
    .body(Body::empty())
    .unwrap();
  let response = app.oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authenticated_user_is_recorded_as_actor() {
  let cfg = config("secret");
  let app = app(&cfg).await;

  let request = Request::builder()
    .method(Method::POST)
    .uri("/api/identities")
    .header(header::AUTHORIZATION, basic("archivist", "secret"))
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(json!({ "faces": ["f1"] }).to_string()))
    .unwrap();
  let response = app.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::CREATED);

  let request = Request::builder()
    .uri("/api/history")
    .header(header::AUTHORIZATION, basic("archivist", "secret"))
    .body(Body::empty())
    .unwrap();
  let response = app.oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let events = body_json(response).await;
  assert_eq!(events[0]["actor"], "archivist");
  assert_eq!(events[0]["action"], "CREATE");
}

// ─── Configuration ────────────────────────────────────────────────────────────

#[test]
fn default_matching_is_valid() {
  assert!(config("x").validate().is_ok());
}

#[test]
fn grouping_threshold_must_stay_below_very_high() {
  let mut cfg = config("x");
  cfg.matching.grouping_threshold = cfg.matching.very_high;
  assert!(cfg.validate().is_err());

  // Between the two tightest tiers is still too loose.
  cfg.matching.grouping_threshold = (cfg.matching.very_high + cfg.matching.high) / 2.0;
  assert!(cfg.validate().is_err());

  cfg.matching.grouping_threshold = cfg.matching.very_high - 0.05;
  assert!(cfg.validate().is_ok());
}

#[test]
fn tiers_must_be_ordered() {
  let mut cfg = config("x");
  cfg.matching.moderate = 0.5;
  assert!(cfg.validate().is_err());
}

#[test]
fn configured_variants_extend_builtin_table() {
  let mut cfg = config("x");
  cfg.name_variants = vec![VariantGroup {
    names: vec!["Ludwig".into(), "Louis".into()],
  }];
  let table = cfg.name_variants();
  assert!(table.are_variants("ludwig", "louis"));
  assert!(table.are_variants("morris", "maurice"));
}
