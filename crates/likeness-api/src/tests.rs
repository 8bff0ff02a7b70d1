//! Router tests driven through `tower::ServiceExt::oneshot` against an
//! in-memory SQLite store.

use std::sync::Arc;

use axum::{
  Router,
  body::{Body, to_bytes},
  http::{Method, Request, StatusCode, header},
};
use likeness_core::{
  face::{Face, FaceCatalog},
  matcher::MatchConfig,
};
use likeness_store_sqlite::SqliteStore;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::{Actor, ApiState, api_router};

fn face(id: &str, photo: &str, mean: [f32; 2]) -> Face {
  Face {
    face_id:              id.into(),
    photo_id:             photo.into(),
    mean:                 mean.to_vec(),
    uncertainty:          vec![],
    detection_confidence: 1.0,
    bbox:                 Default::default(),
  }
}

/// `near1` and `near2` sit close together, `far` is distant, and `group`
/// shares a photo with `near1`.
fn catalog() -> Arc<FaceCatalog> {
  Arc::new(FaceCatalog::new([
    face("near1", "p1", [0.0, 0.0]),
    face("near2", "p2", [0.1, 0.0]),
    face("far", "p3", [5.0, 5.0]),
    face("group", "p1", [0.2, 0.0]),
    face("extra", "p4", [0.0, 0.3]),
  ]))
}

async fn app() -> Router {
  let faces = catalog();
  let store = SqliteStore::open_in_memory(faces.clone())
    .await
    .expect("in-memory store");
  api_router(ApiState {
    store: Arc::new(store),
    faces,
    matching: MatchConfig::default(),
  })
}

async fn send(
  app: &Router,
  method: Method,
  uri: &str,
  body: Option<Value>,
  actor: bool,
) -> (StatusCode, Value) {
  let mut builder = Request::builder().method(method).uri(uri);
  let body = match body {
    Some(v) => {
      builder = builder.header(header::CONTENT_TYPE, "application/json");
      Body::from(v.to_string())
    }
    None => Body::empty(),
  };
  let mut request = builder.body(body).unwrap();
  if actor {
    request.extensions_mut().insert(Actor("reviewer".into()));
  }

  let response = app.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let json = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
  send(app, Method::GET, uri, None, false).await
}

async fn post(app: &Router, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  send(app, Method::POST, uri, body, true).await
}

async fn create(app: &Router, faces: &[&str], name: Option<&str>) -> String {
  let (status, body) =
    post(app, "/identities", Some(json!({ "faces": faces, "name": name }))).await;
  assert_eq!(status, StatusCode::CREATED, "{body}");
  body["identity_id"].as_str().unwrap().to_owned()
}

// ─── Registry ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_get() {
  let app = app().await;
  let id = create(&app, &["near1"], Some("Ada")).await;

  let (status, body) = get(&app, &format!("/identities/{id}")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["name"], "Ada");
  assert_eq!(body["state"], "INBOX");
  assert_eq!(body["version_id"], 1);
}

#[tokio::test]
async fn unknown_identity_is_404() {
  let app = app().await;
  let (status, body) =
    get(&app, "/identities/00000000-0000-0000-0000-000000000000").await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn create_with_unknown_face_is_404() {
  let app = app().await;
  let (status, body) =
    post(&app, "/identities", Some(json!({ "faces": ["ghost"] }))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "face_not_found");
  assert_eq!(body["details"]["face_id"], "ghost");
}

#[tokio::test]
async fn mutation_without_actor_is_401() {
  let app = app().await;
  let request = Request::builder()
    .method(Method::POST)
    .uri("/identities")
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(json!({ "faces": ["near1"] }).to_string()))
    .unwrap();
  let response = app.oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn list_filters_by_state() {
  let app = app().await;
  let a = create(&app, &["near1"], None).await;
  create(&app, &["far"], None).await;
  post(&app, &format!("/identities/{a}/transitions/confirm"), None).await;

  let (status, body) = get(&app, "/identities?state=CONFIRMED").await;
  assert_eq!(status, StatusCode::OK);
  let list = body.as_array().unwrap();
  assert_eq!(list.len(), 1);
  assert_eq!(list[0]["identity_id"], a);
}

// ─── Review ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transition_and_version_conflict() {
  let app = app().await;
  let id = create(&app, &["near1"], None).await;

  let (status, body) =
    post(&app, &format!("/identities/{id}/transitions/confirm?expected_version=1"), None)
      .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["state"], "CONFIRMED");
  assert_eq!(body["version_id"], 2);

  let (status, body) =
    post(&app, &format!("/identities/{id}/rename?expected_version=1"), Some(json!({ "name": "Ada" })))
      .await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["error"], "version_conflict");
  assert_eq!(body["details"]["actual"], 2);
}

#[tokio::test]
async fn invalid_transition_is_422() {
  let app = app().await;
  let id = create(&app, &["near1"], None).await;

  let (status, body) =
    post(&app, &format!("/identities/{id}/transitions/reset"), None).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn detach_returns_both_identities() {
  let app = app().await;
  let id = create(&app, &["near1", "near2"], None).await;

  let (status, body) = post(
    &app,
    &format!("/identities/{id}/detach"),
    Some(json!({ "face_id": "near2" })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(body["first"]["anchor_ids"], json!(["near1"]));
  assert_eq!(body["second"]["anchor_ids"], json!(["near2"]));
}

// ─── Merge ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_name_conflict_is_409_with_both_sides() {
  let app = app().await;
  let a = create(&app, &["near1"], Some("Ada")).await;
  let b = create(&app, &["near2"], Some("Grace")).await;

  let (status, body) =
    post(&app, "/merge", Some(json!({ "target_id": a, "source_id": b }))).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["error"], "name_conflict");
  assert_eq!(body["details"]["target"]["name"], "Ada");
  assert_eq!(body["details"]["source"]["name"], "Grace");

  let (status, body) = post(
    &app,
    "/merge",
    Some(json!({ "target_id": a, "source_id": b, "resolved_name": "Ada L." })),
  )
  .await;
  assert_eq!(status, StatusCode::OK, "{body}");
  assert_eq!(body["status"], "merged");
  assert_eq!(body["target"]["name"], "Ada L.");
}

#[tokio::test]
async fn merge_then_undo() {
  let app = app().await;
  let a = create(&app, &["near1"], None).await;
  let b = create(&app, &["near2"], None).await;

  let (status, _) =
    post(&app, "/merge", Some(json!({ "target_id": a, "source_id": b }))).await;
  assert_eq!(status, StatusCode::OK);

  let (_, merged) = get(&app, &format!("/identities/{b}")).await;
  assert_eq!(merged["lifecycle"]["status"], "merged_into");
  assert_eq!(merged["lifecycle"]["target"], a);

  let (status, body) = post(&app, &format!("/identities/{a}/undo-merge"), None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["anchor_ids"], json!(["near1"]));

  let (status, body) = post(&app, &format!("/identities/{a}/undo-merge"), None).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(body["error"], "no_merge_history");
}

#[tokio::test]
async fn merge_blocked_by_cooccurrence() {
  let app = app().await;
  let a = create(&app, &["near1"], None).await;
  let b = create(&app, &["group"], None).await;

  let (status, body) =
    post(&app, "/merge", Some(json!({ "target_id": a, "source_id": b }))).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["error"], "co_occurrence");
  assert_eq!(body["details"]["photo_id"], "p1");
}

#[tokio::test]
async fn merge_of_merged_identity_is_409() {
  let app = app().await;
  let a = create(&app, &["near1"], None).await;
  let b = create(&app, &["near2"], None).await;
  let c = create(&app, &["far"], None).await;
  post(&app, "/merge", Some(json!({ "target_id": a, "source_id": b }))).await;

  let (status, body) =
    post(&app, "/merge", Some(json!({ "target_id": c, "source_id": b }))).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert_eq!(body["error"], "already_merged");
  assert_eq!(body["details"]["merged_into"], a);
}

// ─── Matching, search, ingestion ──────────────────────────────────────────────

#[tokio::test]
async fn neighbors_are_ranked_by_distance() {
  let app = app().await;
  let a = create(&app, &["near1"], None).await;
  let b = create(&app, &["near2"], None).await;
  let c = create(&app, &["far"], None).await;

  let (status, body) = get(&app, &format!("/identities/{a}/neighbors?k=5")).await;
  assert_eq!(status, StatusCode::OK);
  let list = body.as_array().unwrap();
  assert_eq!(list.len(), 2);
  assert_eq!(list[0]["candidate_id"], b);
  assert_eq!(list[0]["tier"], "very_high");
  assert_eq!(list[1]["candidate_id"], c);
  assert_eq!(list[1]["tier"], "low");
}

#[tokio::test]
async fn rejected_pair_is_not_a_neighbor() {
  let app = app().await;
  let a = create(&app, &["near1"], None).await;
  let b = create(&app, &["near2"], None).await;

  let (status, _) = post(
    &app,
    &format!("/identities/{a}/reject-pair"),
    Some(json!({ "other_id": b })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);

  let (_, body) = get(&app, &format!("/identities/{a}/neighbors")).await;
  assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn similar_faces_for_unknown_face_is_404() {
  let app = app().await;
  let (status, body) = get(&app, "/faces/ghost/similar").await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "face_not_found");
}

#[tokio::test]
async fn search_finds_named_identity() {
  let app = app().await;
  let a = create(&app, &["near1"], Some("Morris Cohen")).await;
  create(&app, &["far"], Some("Grace Hopper")).await;

  let (status, body) = get(&app, "/search?q=maurice").await;
  assert_eq!(status, StatusCode::OK);
  let hits = body.as_array().unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0]["identity"]["identity_id"], a);

  let (_, body) = get(&app, "/search?q=maurice&expand_variants=false").await;
  assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn ingest_groups_and_skips_held_faces() {
  let app = app().await;
  create(&app, &["extra"], None).await;

  let (status, body) = post(
    &app,
    "/ingest",
    Some(json!({ "faces": ["near1", "near2", "far", "extra"], "source": "upload" })),
  )
  .await;
  assert_eq!(status, StatusCode::CREATED, "{body}");
  assert_eq!(body["skipped"], json!(["extra"]));
  let created = body["created"].as_array().unwrap();
  assert_eq!(created.len(), 2);
  assert_eq!(created[0]["anchor_ids"], json!(["near1", "near2"]));
  assert_eq!(created[1]["anchor_ids"], json!(["far"]));
}

#[tokio::test]
async fn history_lists_events_oldest_first() {
  let app = app().await;
  let id = create(&app, &["near1"], None).await;
  post(&app, &format!("/identities/{id}/transitions/confirm"), None).await;

  let (status, body) = get(&app, &format!("/identities/{id}/history")).await;
  assert_eq!(status, StatusCode::OK);
  let actions: Vec<&str> = body
    .as_array()
    .unwrap()
    .iter()
    .map(|e| e["action"].as_str().unwrap())
    .collect();
  assert_eq!(actions, ["CREATE", "CONFIRM"]);

  let (_, all) = get(&app, "/history").await;
  assert_eq!(all.as_array().unwrap().len(), 2);
}
