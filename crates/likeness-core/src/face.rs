//! Faces and the read-only collaborators that describe them.
//!
//! Faces are produced upstream (detection plus embedding) and are never
//! mutated here. The engine only needs two lookups: a face's embedding and
//! the photos it appears in.

use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
  io::Read,
};

use serde::{Deserialize, Serialize};

use crate::Result;

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Opaque identifier of a detected face, assigned by the detection pipeline.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FaceId(pub String);

impl FaceId {
  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for FaceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for FaceId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

/// Opaque identifier of an archived photo.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PhotoId(pub String);

impl fmt::Display for PhotoId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for PhotoId {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

// ─── Face ────────────────────────────────────────────────────────────────────

/// Pixel-space bounding box of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x:      f32,
  pub y:      f32,
  pub width:  f32,
  pub height: f32,
}

/// A detected face with its probabilistic embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Face {
  pub face_id:              FaceId,
  pub photo_id:             PhotoId,
  /// Mean of the embedding distribution; the vector used for distances.
  pub mean:                 Vec<f32>,
  /// Per-dimension uncertainty reported by the embedding model.
  #[serde(default)]
  pub uncertainty:          Vec<f32>,
  #[serde(default)]
  pub detection_confidence: f32,
  #[serde(default)]
  pub bbox:                 BoundingBox,
}

// ─── Collaborator traits ─────────────────────────────────────────────────────

/// Read-only source of face embeddings.
pub trait EmbeddingSource {
  /// Look up a face. Returns `None` when no embedding exists for it.
  fn face(&self, face_id: &FaceId) -> Option<&Face>;
}

/// Read-only index from a face to the photos it appears in.
pub trait CooccurrenceIndex {
  /// All photos containing `face_id`. Unknown faces appear in no photo.
  fn photos_of(&self, face_id: &FaceId) -> BTreeSet<PhotoId>;
}

// ─── FaceCatalog ─────────────────────────────────────────────────────────────

/// An in-memory, read-only catalog implementing both collaborator traits.
#[derive(Debug, Clone, Default)]
pub struct FaceCatalog {
  faces: BTreeMap<FaceId, Face>,
}

impl FaceCatalog {
  pub fn new(faces: impl IntoIterator<Item = Face>) -> Self {
    Self {
      faces: faces
        .into_iter()
        .map(|face| (face.face_id.clone(), face))
        .collect(),
    }
  }

  /// Load a catalog from a JSON array of [`Face`] records.
  pub fn from_reader(reader: impl Read) -> Result<Self> {
    let faces: Vec<Face> = serde_json::from_reader(reader)?;
    Ok(Self::new(faces))
  }

  pub fn len(&self) -> usize { self.faces.len() }

  pub fn is_empty(&self) -> bool { self.faces.is_empty() }

  pub fn contains(&self, face_id: &FaceId) -> bool {
    self.faces.contains_key(face_id)
  }
}

impl EmbeddingSource for FaceCatalog {
  fn face(&self, face_id: &FaceId) -> Option<&Face> { self.faces.get(face_id) }
}

impl CooccurrenceIndex for FaceCatalog {
  fn photos_of(&self, face_id: &FaceId) -> BTreeSet<PhotoId> {
    self
      .faces
      .get(face_id)
      .map(|f| BTreeSet::from([f.photo_id.clone()]))
      .unwrap_or_default()
  }
}
