//! Automatic grouping of a freshly ingested batch.
//!
//! Single-linkage clustering over a union-find forest. Pairs are joined in
//! ascending distance order as long as they are closer than the grouping
//! threshold and the two clusters never share a photo. The threshold is kept
//! stricter than the "high" tier so the grouper only proposes clusters a
//! reviewer would accept at a glance.

use std::collections::{BTreeSet, HashMap};

use crate::{
  face::{CooccurrenceIndex, EmbeddingSource, FaceId, PhotoId},
  matcher::euclidean,
};

/// Distance below which two faces are grouped by default.
pub const DEFAULT_GROUPING_THRESHOLD: f32 = 0.70;

// ─── Union-find ──────────────────────────────────────────────────────────────

/// Disjoint-set forest with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
  parent: Vec<usize>,
  rank:   Vec<u8>,
}

impl UnionFind {
  pub fn new(len: usize) -> Self {
    Self { parent: (0..len).collect(), rank: vec![0; len] }
  }

  pub fn find(&mut self, mut x: usize) -> usize {
    let mut root = x;
    while self.parent[root] != root {
      root = self.parent[root];
    }
    while self.parent[x] != root {
      let next = self.parent[x];
      self.parent[x] = root;
      x = next;
    }
    root
  }

  /// Join the sets holding `a` and `b`. Returns the new root.
  pub fn union(&mut self, a: usize, b: usize) -> usize {
    let (ra, rb) = (self.find(a), self.find(b));
    if ra == rb {
      return ra;
    }
    match self.rank[ra].cmp(&self.rank[rb]) {
      std::cmp::Ordering::Less => {
        self.parent[ra] = rb;
        rb
      }
      std::cmp::Ordering::Greater => {
        self.parent[rb] = ra;
        ra
      }
      std::cmp::Ordering::Equal => {
        self.parent[rb] = ra;
        self.rank[ra] = self.rank[ra].saturating_add(1);
        ra
      }
    }
  }
}

// ─── Grouping ────────────────────────────────────────────────────────────────

/// Partition `faces` into groups of likely-same-person faces.
///
/// Every input face lands in exactly one group. Duplicates are ignored and
/// faces without an embedding become singletons. Groups are returned in order
/// of their first member's position in the input.
pub fn group<E, P>(
  faces: &[FaceId],
  threshold: f32,
  embeddings: &E,
  photos: &P,
) -> Vec<Vec<FaceId>>
where
  E: EmbeddingSource + ?Sized,
  P: CooccurrenceIndex + ?Sized,
{
  let mut seen = BTreeSet::new();
  let faces: Vec<&FaceId> = faces.iter().filter(|f| seen.insert(*f)).collect();

  let mut cluster_photos: Vec<BTreeSet<PhotoId>> =
    faces.iter().map(|f| photos.photos_of(f)).collect();

  let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
  for (i, a) in faces.iter().enumerate() {
    let Some(fa) = embeddings.face(a) else { continue };
    for (j, b) in faces.iter().enumerate().skip(i + 1) {
      let Some(fb) = embeddings.face(b) else { continue };
      match euclidean(&fa.mean, &fb.mean) {
        Some(d) if d < threshold => pairs.push((d, i, j)),
        _ => {}
      }
    }
  }
  pairs.sort_by(|x, y| {
    x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2))
  });

  let mut forest = UnionFind::new(faces.len());
  for (_, i, j) in pairs {
    let (ri, rj) = (forest.find(i), forest.find(j));
    if ri == rj || !cluster_photos[ri].is_disjoint(&cluster_photos[rj]) {
      continue;
    }
    let root = forest.union(ri, rj);
    let other = if root == ri { rj } else { ri };
    let moved = std::mem::take(&mut cluster_photos[other]);
    cluster_photos[root].extend(moved);
  }

  let mut slot: HashMap<usize, usize> = HashMap::new();
  let mut groups: Vec<Vec<FaceId>> = Vec::new();
  for (i, face) in faces.iter().enumerate() {
    let root = forest.find(i);
    let index = *slot.entry(root).or_insert_with(|| {
      groups.push(Vec::new());
      groups.len() - 1
    });
    groups[index].push((*face).clone());
  }
  groups
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::face::{Face, FaceCatalog};

  fn face(id: &str, photo: &str, mean: &[f32]) -> Face {
    Face {
      face_id:              id.into(),
      photo_id:             photo.into(),
      mean:                 mean.to_vec(),
      uncertainty:          vec![],
      detection_confidence: 1.0,
      bbox:                 Default::default(),
    }
  }

  fn ids(names: &[&str]) -> Vec<FaceId> {
    names.iter().map(|n| FaceId::from(*n)).collect()
  }

  #[test]
  fn union_find_merges_and_compresses() {
    let mut uf = UnionFind::new(5);
    uf.union(0, 1);
    uf.union(2, 3);
    uf.union(1, 3);
    let root = uf.find(0);
    assert!((0..4).all(|i| uf.find(i) == root));
    assert_ne!(uf.find(4), root);
  }

  #[test]
  fn close_faces_group_and_far_faces_stay_apart() {
    let catalog = FaceCatalog::new([
      face("a1", "p1", &[0.0, 0.0]),
      face("a2", "p2", &[0.3, 0.0]),
      face("a3", "p3", &[0.6, 0.0]),
      face("b1", "p4", &[5.0, 5.0]),
    ]);
    let groups = group(&ids(&["a1", "b1", "a2", "a3"]), 0.7, &catalog, &catalog);
    assert_eq!(groups, vec![ids(&["a1", "a2", "a3"]), ids(&["b1"])]);
  }

  #[test]
  fn faces_in_one_photo_never_share_a_group() {
    // Twins photographed together, plus a third photo of one of them.
    let catalog = FaceCatalog::new([
      face("t1", "p1", &[0.0, 0.0]),
      face("t2", "p1", &[0.1, 0.0]),
      face("t3", "p2", &[0.05, 0.0]),
    ]);
    let groups = group(&ids(&["t1", "t2", "t3"]), 0.7, &catalog, &catalog);
    assert_eq!(groups.len(), 2);
    for g in &groups {
      assert!(!(g.contains(&"t1".into()) && g.contains(&"t2".into())));
    }
    assert_eq!(groups.iter().map(Vec::len).sum::<usize>(), 3);
  }

  #[test]
  fn missing_embeddings_and_duplicates() {
    let catalog = FaceCatalog::new([face("a", "p1", &[0.0]), face("b", "p2", &[0.1])]);
    let groups = group(&ids(&["a", "ghost", "b", "a"]), 0.7, &catalog, &catalog);
    assert_eq!(groups, vec![ids(&["a", "b"]), ids(&["ghost"])]);
  }

  #[test]
  fn threshold_is_exclusive() {
    let catalog = FaceCatalog::new([face("a", "p1", &[0.0]), face("b", "p2", &[0.7])]);
    let groups = group(&ids(&["a", "b"]), 0.7, &catalog, &catalog);
    assert_eq!(groups.len(), 2);
  }
}
