//! Best-linkage neighbor ranking.
//!
//! The distance between two identities is the minimum Euclidean distance over
//! every face pair across them (single linkage), never a centroid distance.
//!
//! Everything here is a pure function of its inputs. Candidate identities are
//! scored on scoped worker threads when there are enough of them.

use std::{collections::BTreeSet, thread};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  face::{CooccurrenceIndex, EmbeddingSource, Face, FaceId, PhotoId},
  identity::{Identity, IdentityState},
  rejection,
};

/// Below this many candidates the scoring runs on the calling thread.
const PARALLEL_MIN_CANDIDATES: usize = 64;

// ─── Thresholds and tiers ────────────────────────────────────────────────────

/// Calibrated distance cut-offs, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
  pub very_high: f32,
  pub high:      f32,
  pub moderate:  f32,
}

impl Default for MatchThresholds {
  fn default() -> Self {
    Self { very_high: 0.80, high: 1.00, moderate: 1.20 }
  }
}

/// Confidence band a distance falls into.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
  VeryHigh,
  High,
  Moderate,
  Low,
}

impl MatchThresholds {
  pub fn tier(&self, distance: f32) -> Tier {
    if distance < self.very_high {
      Tier::VeryHigh
    } else if distance < self.high {
      Tier::High
    } else if distance < self.moderate {
      Tier::Moderate
    } else {
      Tier::Low
    }
  }
}

/// Matching and grouping settings, as read from the `[matching]` table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
  pub very_high:          f32,
  pub high:               f32,
  pub moderate:           f32,
  /// Distance below which the ingestion grouper joins two faces.
  pub grouping_threshold: f32,
  /// Neighbors returned when the caller does not ask for a count.
  pub default_k:          usize,
}

impl Default for MatchConfig {
  fn default() -> Self {
    let t = MatchThresholds::default();
    Self {
      very_high:          t.very_high,
      high:               t.high,
      moderate:           t.moderate,
      grouping_threshold: crate::grouper::DEFAULT_GROUPING_THRESHOLD,
      default_k:          10,
    }
  }
}

impl MatchConfig {
  pub fn thresholds(&self) -> MatchThresholds {
    MatchThresholds {
      very_high: self.very_high,
      high:      self.high,
      moderate:  self.moderate,
    }
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityNeighbor {
  pub candidate_id: Uuid,
  pub name:         Option<String>,
  pub state:        IdentityState,
  pub distance:     f32,
  pub tier:         Tier,
  /// The closest face pair: (query face, candidate face).
  pub closest:      (FaceId, FaceId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceNeighbor {
  pub candidate_id: FaceId,
  /// The live identity holding the candidate face.
  pub identity_id:  Uuid,
  pub distance:     f32,
  pub tier:         Tier,
}

// ─── Distance ────────────────────────────────────────────────────────────────

/// Euclidean distance between two mean vectors, accumulated in `f64`.
/// Returns `None` when the dimensions differ.
pub fn euclidean(a: &[f32], b: &[f32]) -> Option<f32> {
  if a.len() != b.len() {
    return None;
  }
  let sum: f64 = a
    .iter()
    .zip(b)
    .map(|(x, y)| {
      let d = f64::from(*x) - f64::from(*y);
      d * d
    })
    .sum();
  Some(sum.sqrt() as f32)
}

/// Minimum pairwise distance between two face sets, with the closest pair.
pub fn best_linkage<'a>(
  a: &[&'a Face],
  b: &[&'a Face],
) -> Option<(f32, &'a FaceId, &'a FaceId)> {
  let mut best: Option<(f32, &FaceId, &FaceId)> = None;
  for fa in a {
    for fb in b {
      let Some(d) = euclidean(&fa.mean, &fb.mean) else {
        continue;
      };
      if best.is_none_or(|(bd, _, _)| d < bd) {
        best = Some((d, &fa.face_id, &fb.face_id));
      }
    }
  }
  best
}

fn embeddings<'a, E>(
  faces: impl Iterator<Item = &'a FaceId>,
  source: &'a E,
) -> Vec<&'a Face>
where
  E: EmbeddingSource + ?Sized,
{
  faces.filter_map(|f| source.face(f)).collect()
}

fn photos_of_all<'a, P>(
  faces: impl Iterator<Item = &'a FaceId>,
  photos: &P,
) -> BTreeSet<PhotoId>
where
  P: CooccurrenceIndex + ?Sized,
{
  faces.flat_map(|f| photos.photos_of(f)).collect()
}

fn rank<T>(mut hits: Vec<T>, k: usize, key: impl Fn(&T) -> (f32, String)) -> Vec<T> {
  hits.sort_by(|a, b| {
    let (da, ta) = key(a);
    let (db, tb) = key(b);
    da.total_cmp(&db).then_with(|| ta.cmp(&tb))
  });
  hits.truncate(k);
  hits
}

/// Map `f` over `items`, splitting the work across scoped threads when the
/// input is large enough to be worth it.
fn score_all<T, R, F>(items: &[T], f: F) -> Vec<R>
where
  T: Sync,
  R: Send,
  F: Fn(&T) -> Option<R> + Sync,
{
  let workers = thread::available_parallelism().map_or(1, usize::from);
  if items.len() < PARALLEL_MIN_CANDIDATES || workers < 2 {
    return items.iter().filter_map(&f).collect();
  }

  let chunk = items.len().div_ceil(workers);
  thread::scope(|scope| {
    let handles: Vec<_> = items
      .chunks(chunk)
      .map(|part| {
        let f = &f;
        scope.spawn(move || part.iter().filter_map(f).collect::<Vec<_>>())
      })
      .collect();
    handles
      .into_iter()
      .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
      .collect()
  })
}

// ─── Identity neighbors ──────────────────────────────────────────────────────

/// Rejected identities are parked, not deleted; they are never suggested.
fn is_candidate(identity: &Identity) -> bool {
  identity.is_active() && identity.state != IdentityState::Rejected
}

/// Rank the live identities closest to `query_id`.
///
/// Excluded: the query itself, soft-deleted and `REJECTED` identities,
/// identities paired against the query in rejection memory, and identities
/// sharing a photo with the query. Faces the query has individually rejected are ignored on
/// the candidate side. Faces without embeddings are skipped.
pub fn find_neighbors<E, P>(
  identities: &[Identity],
  query_id: Uuid,
  k: usize,
  embeddings_source: &E,
  photos: &P,
  thresholds: &MatchThresholds,
) -> Result<Vec<IdentityNeighbor>>
where
  E: EmbeddingSource + Sync + ?Sized,
  P: CooccurrenceIndex + Sync + ?Sized,
{
  let query = identities
    .iter()
    .find(|i| i.identity_id == query_id)
    .ok_or(Error::IdentityNotFound(query_id))?;
  query.ensure_active()?;

  let query_faces = embeddings(query.faces(), embeddings_source);
  if query_faces.is_empty() {
    return Ok(Vec::new());
  }
  let query_photos = photos_of_all(query.faces(), photos);
  let rejected = rejection::rejected_faces(query);

  let candidates: Vec<&Identity> = identities
    .iter()
    .filter(|c| is_candidate(c) && c.identity_id != query_id)
    .filter(|c| !rejection::is_rejected_pair(query, c))
    .collect();

  let hits = score_all(&candidates, |candidate| {
    let faces: Vec<&Face> = embeddings(
      candidate.faces().filter(|f| !rejected.contains(f)),
      embeddings_source,
    );
    if faces.is_empty() {
      return None;
    }
    let candidate_photos = photos_of_all(candidate.faces(), photos);
    if !query_photos.is_disjoint(&candidate_photos) {
      return None;
    }
    let (distance, q, c) = best_linkage(&query_faces, &faces)?;
    Some(IdentityNeighbor {
      candidate_id: candidate.identity_id,
      name: candidate.name.clone(),
      state: candidate.state,
      distance,
      tier: thresholds.tier(distance),
      closest: (q.clone(), c.clone()),
    })
  });

  Ok(rank(hits, k, |n| (n.distance, n.candidate_id.to_string())))
}

// ─── Face neighbors ──────────────────────────────────────────────────────────

/// Rank faces held by other live identities by distance to `face_id`.
///
/// Faces in the same photo as the query face, faces of the identity holding
/// it, and faces rejected by that identity are excluded.
pub fn find_similar_faces<E, P>(
  identities: &[Identity],
  face_id: &FaceId,
  k: usize,
  embeddings_source: &E,
  photos: &P,
  thresholds: &MatchThresholds,
) -> Result<Vec<FaceNeighbor>>
where
  E: EmbeddingSource + Sync + ?Sized,
  P: CooccurrenceIndex + Sync + ?Sized,
{
  let query = embeddings_source
    .face(face_id)
    .ok_or_else(|| Error::FaceNotFound(face_id.clone()))?;
  let query_photos = photos.photos_of(face_id);
  let owner = identities
    .iter()
    .find(|i| i.is_active() && i.holds_face(face_id));
  let rejected: BTreeSet<&FaceId> =
    owner.map(rejection::rejected_faces).unwrap_or_default();

  let candidates: Vec<&Identity> = identities
    .iter()
    .filter(|c| is_candidate(c))
    .filter(|c| owner.is_none_or(|o| o.identity_id != c.identity_id))
    .filter(|c| owner.is_none_or(|o| !rejection::is_rejected_pair(o, c)))
    .collect();

  let per_identity: Vec<Vec<FaceNeighbor>> = score_all(&candidates, |candidate| {
    let hits: Vec<FaceNeighbor> = candidate
      .faces()
      .filter(|f| *f != face_id && !rejected.contains(f))
      .filter(|f| query_photos.is_disjoint(&photos.photos_of(f)))
      .filter_map(|f| embeddings_source.face(f))
      .filter_map(|face| {
        let distance = euclidean(&query.mean, &face.mean)?;
        Some(FaceNeighbor {
          candidate_id: face.face_id.clone(),
          identity_id: candidate.identity_id,
          distance,
          tier: thresholds.tier(distance),
        })
      })
      .collect();
    Some(hits)
  });

  Ok(rank(
    per_identity.into_iter().flatten().collect(),
    k,
    |n| (n.distance, n.candidate_id.to_string()),
  ))
}
