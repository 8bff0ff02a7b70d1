//! Name search with spelling-variant expansion.
//!
//! Archive names drift across records: a great-grandfather appears as Moshe
//! on a ship manifest, Moise in a census and Morris on a headstone. With
//! expansion enabled, each query token also matches every spelling in its
//! variant group.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Built-in variant groups. Every entry is lowercase.
const BUILTIN_GROUPS: &[&[&str]] = &[
  &["morris", "maurice", "moise", "moshe", "moishe", "moses", "morrie"],
  &["abraham", "avraham", "abram", "avrom", "abe"],
  &["isaac", "itzhak", "yitzchak", "isak", "izaak", "itzik"],
  &["jacob", "yaakov", "jakob", "yankel", "jake"],
  &["samuel", "shmuel", "schmuel", "zanvil", "sam"],
  &["solomon", "shlomo", "salomon", "zalman", "sol"],
  &["chaim", "haim", "hyman", "hymie", "vitaly"],
  &["leib", "leo", "leon", "leibel", "lev"],
  &["joseph", "yosef", "josef", "giuseppe", "jose", "yossel"],
  &["john", "johann", "johannes", "giovanni", "juan", "jan", "ivan", "sean"],
  &["rebecca", "rebekah", "rivka", "rifka", "riva"],
  &["sarah", "sara", "sura", "sorah", "sadie"],
  &["rachel", "rahel", "rochel", "ruchel"],
  &["esther", "ester", "estera", "ettel", "etta"],
  &["catherine", "katherine", "kathryn", "katarzyna", "caterina", "katya"],
  &["cohen", "kohn", "cohn", "kahn", "kogan", "kagan"],
  &["levy", "levi", "levin", "levine", "lewin"],
  &["schwartz", "schwarz", "shvarts", "swartz"],
  &["friedman", "fridman", "freedman", "friedmann"],
  &["katz", "kats", "catz"],
];

// ─── Variant table ───────────────────────────────────────────────────────────

/// Groups of interchangeable name spellings.
#[derive(Debug, Clone, Default)]
pub struct NameVariants {
  groups: Vec<BTreeSet<String>>,
  index:  HashMap<String, usize>,
}

impl NameVariants {
  /// The built-in heritage name table.
  pub fn builtin() -> Self {
    let mut table = Self::default();
    table.extend(
      BUILTIN_GROUPS
        .iter()
        .map(|group| group.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>()),
    );
    table
  }

  /// Add groups. A group sharing a spelling with an existing one is folded
  /// into it.
  pub fn extend<I, G, S>(&mut self, groups: I)
  where
    I: IntoIterator<Item = G>,
    G: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    for group in groups {
      let names: BTreeSet<String> =
        group.into_iter().map(|s| s.as_ref().trim().to_lowercase()).collect();
      let names: BTreeSet<String> =
        names.into_iter().filter(|s| !s.is_empty()).collect();
      if names.len() < 2 {
        continue;
      }

      let mut hits: Vec<usize> =
        names.iter().filter_map(|n| self.index.get(n).copied()).collect();
      hits.sort_unstable();
      hits.dedup();

      match hits.split_first() {
        None => self.groups.push(names),
        Some((&keep, rest)) => {
          self.groups[keep].extend(names);
          for &other in rest {
            let moved = std::mem::take(&mut self.groups[other]);
            self.groups[keep].extend(moved);
          }
        }
      }
      self.reindex();
    }
  }

  fn reindex(&mut self) {
    self.groups.retain(|g| !g.is_empty());
    self.index = self
      .groups
      .iter()
      .enumerate()
      .flat_map(|(i, g)| g.iter().map(move |n| (n.clone(), i)))
      .collect();
  }

  /// Every spelling interchangeable with `token`, excluding `token` itself.
  pub fn variants_of(&self, token: &str) -> impl Iterator<Item = &str> {
    let token = token.to_lowercase();
    self
      .index
      .get(&token)
      .map(|&i| &self.groups[i])
      .into_iter()
      .flatten()
      .filter(move |n| **n != token)
      .map(String::as_str)
  }

  pub fn are_variants(&self, a: &str, b: &str) -> bool {
    let (a, b) = (a.to_lowercase(), b.to_lowercase());
    match (self.index.get(&a), self.index.get(&b)) {
      (Some(x), Some(y)) => x == y,
      _ => false,
    }
  }

  pub fn len(&self) -> usize { self.groups.len() }

  pub fn is_empty(&self) -> bool { self.groups.is_empty() }
}

// ─── Ranking ─────────────────────────────────────────────────────────────────

pub const SCORE_EXACT: f32 = 3.0;
pub const SCORE_ALL_TOKENS: f32 = 2.0;
pub const SCORE_VARIANTS: f32 = 1.0;
pub const SCORE_PREFIX: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
  pub score:    f32,
  pub identity: Identity,
}

fn tokens(s: &str) -> Vec<String> {
  s.split(|c: char| !c.is_alphanumeric())
    .filter(|t| !t.is_empty())
    .map(str::to_lowercase)
    .collect()
}

fn score(query: &[String], name: &[String], variants: Option<&NameVariants>) -> Option<f32> {
  if query == name {
    return Some(SCORE_EXACT);
  }
  if query.iter().all(|q| name.contains(q)) {
    return Some(SCORE_ALL_TOKENS);
  }
  if let Some(table) = variants {
    let matched = query
      .iter()
      .all(|q| name.iter().any(|n| n == q || table.are_variants(q, n)));
    if matched {
      return Some(SCORE_VARIANTS);
    }
  }
  if query.iter().any(|q| name.iter().any(|n| n.starts_with(q.as_str()))) {
    return Some(SCORE_PREFIX);
  }
  None
}

/// Rank active identities by how well their names match `query`.
///
/// Pass `variants` to enable spelling-variant expansion. An empty query
/// matches nothing; use a listing instead.
pub fn rank<'a>(
  identities: impl IntoIterator<Item = &'a Identity>,
  query: &str,
  variants: Option<&NameVariants>,
) -> Vec<SearchHit> {
  let query = tokens(query);
  if query.is_empty() {
    return Vec::new();
  }

  let mut hits: Vec<SearchHit> = identities
    .into_iter()
    .filter(|i| i.is_active())
    .filter_map(|identity| {
      let name = tokens(identity.name.as_deref()?);
      let score = score(&query, &name, variants)?;
      Some(SearchHit { score, identity: identity.clone() })
    })
    .collect();

  hits.sort_by(|a, b| {
    b.score
      .total_cmp(&a.score)
      .then_with(|| a.identity.name.cmp(&b.identity.name))
      .then_with(|| a.identity.identity_id.cmp(&b.identity.identity_id))
  });
  hits
}
