//! Ingestion: turn a batch of freshly detected faces into provisional
//! identities.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  face::{CooccurrenceIndex, EmbeddingSource, FaceId},
  grouper,
  identity::Identity,
  mutation::NewIdentity,
  store::{IdentityQuery, IdentityStore},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
  pub faces:  Vec<FaceId>,
  /// Free-text label of the upload or import batch.
  #[serde(default)]
  pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
  pub batch_id: Uuid,
  /// One `INBOX` identity per group, in group order.
  pub created:  Vec<Identity>,
  /// Faces skipped because an active identity already holds them.
  pub skipped:  Vec<FaceId>,
}

/// Group `request.faces` and create one identity per group.
///
/// Faces already held by an active identity are left where they are. All
/// identities of the batch are created in a single transaction.
pub async fn ingest<S, E, P>(
  store: &S,
  embeddings: &E,
  photos: &P,
  request: IngestRequest,
  threshold: f32,
  actor: &str,
) -> Result<IngestReport, S::Error>
where
  S: IdentityStore,
  E: EmbeddingSource + Sync + ?Sized,
  P: CooccurrenceIndex + Sync + ?Sized,
{
  let holders = store.list_identities(IdentityQuery::holders()).await?;

  let (skipped, fresh): (Vec<FaceId>, Vec<FaceId>) = request
    .faces
    .into_iter()
    .partition(|f| holders.iter().any(|i| i.holds_face(f)));

  let batch_id = Uuid::new_v4();
  let inputs: Vec<NewIdentity> = grouper::group(&fresh, threshold, embeddings, photos)
    .into_iter()
    .map(|faces| {
      NewIdentity::auto_grouped(faces, batch_id, request.source.clone(), actor)
    })
    .collect();

  let created = if inputs.is_empty() {
    Vec::new()
  } else {
    store.create_identities(inputs).await?
  };

  Ok(IngestReport { batch_id, created, skipped })
}
