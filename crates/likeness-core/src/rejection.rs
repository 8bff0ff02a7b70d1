//! Rejection memory: "these two are not the same person".
//!
//! Memories live inside identity records as [`NegativeEntry`] values. A pair
//! rejection is written to both identities so either side can consult it
//! without loading the other.

use std::collections::BTreeSet;

use serde_json::json;

use crate::{
  Error, Result,
  face::FaceId,
  history::{HistoryAction, HistoryEvent, Stamp},
  identity::{Identity, NegativeEntry},
  mutation::MutationContext,
};

/// Record that `a` and `b` are different people.
///
/// Idempotent per side: an existing memory is left as-is, but each side still
/// receives an event and version bump so the reviewer's decision is logged.
pub fn reject_pair(
  a: &mut Identity,
  b: &mut Identity,
  ctx: &MutationContext,
  stamp: &Stamp,
) -> Result<[HistoryEvent; 2]> {
  check_pair(a, b, ctx)?;
  let a_event = remember(a, b.identity_id, stamp);
  let b_event = remember(b, a.identity_id, stamp);
  Ok([a_event, b_event])
}

/// Forget a pair rejection on both sides.
pub fn unreject_pair(
  a: &mut Identity,
  b: &mut Identity,
  ctx: &MutationContext,
  stamp: &Stamp,
) -> Result<[HistoryEvent; 2]> {
  check_pair(a, b, ctx)?;
  let a_event = forget(a, b.identity_id, stamp);
  let b_event = forget(b, a.identity_id, stamp);
  Ok([a_event, b_event])
}

fn check_pair(a: &Identity, b: &Identity, ctx: &MutationContext) -> Result<()> {
  if a.identity_id == b.identity_id {
    return Err(Error::InvalidPair(a.identity_id));
  }
  ctx.check(a)?;
  b.ensure_active()
}

fn remember(identity: &mut Identity, other: uuid::Uuid, stamp: &Stamp) -> HistoryEvent {
  let entry = NegativeEntry::IdentityPair { identity_id: other };
  if !identity.negative_ids.contains(&entry) {
    identity.negative_ids.push(entry);
  }
  let previous = identity.touch(stamp.at);
  HistoryEvent::new(identity.identity_id, HistoryAction::RejectPair, previous, stamp)
    .with_metadata(json!({ "other_identity_id": other }))
}

fn forget(identity: &mut Identity, other: uuid::Uuid, stamp: &Stamp) -> HistoryEvent {
  identity.negative_ids.retain(
    |n| !matches!(n, NegativeEntry::IdentityPair { identity_id } if *identity_id == other),
  );
  let previous = identity.touch(stamp.at);
  HistoryEvent::new(identity.identity_id, HistoryAction::UnrejectPair, previous, stamp)
    .with_metadata(json!({ "other_identity_id": other }))
}

/// True when either identity remembers the other as a different person.
pub fn is_rejected_pair(a: &Identity, b: &Identity) -> bool {
  a.pair_negatives().any(|id| id == b.identity_id)
    || b.pair_negatives().any(|id| id == a.identity_id)
}

/// Faces `query` has individually rejected.
pub fn rejected_faces<'a>(query: &'a Identity) -> BTreeSet<&'a FaceId> {
  query.face_negatives().collect()
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::identity::Provenance;

  fn identity(face: &str) -> Identity {
    Identity::new(
      vec![face.into()],
      Provenance::Manual { created_by: "t".into() },
      Utc::now(),
    )
  }

  #[test]
  fn pair_rejection_is_written_to_both_sides() {
    let (mut a, mut b) = (identity("a"), identity("b"));
    let ctx = MutationContext::new("reviewer");
    let events = reject_pair(&mut a, &mut b, &ctx, &Stamp::now("reviewer")).unwrap();

    assert!(is_rejected_pair(&a, &b));
    assert!(is_rejected_pair(&b, &a));
    assert_eq!(events[0].identity_id, a.identity_id);
    assert_eq!(events[1].identity_id, b.identity_id);
    assert_eq!((a.version_id, b.version_id), (2, 2));

    // Rejecting again does not duplicate the memory.
    reject_pair(&mut a, &mut b, &ctx, &Stamp::now("reviewer")).unwrap();
    assert_eq!(a.pair_negatives().count(), 1);

    unreject_pair(&mut a, &mut b, &ctx, &Stamp::now("reviewer")).unwrap();
    assert!(!is_rejected_pair(&a, &b));
  }

  #[test]
  fn self_pair_is_invalid() {
    let mut a = identity("a");
    let mut same = a.clone();
    let err = reject_pair(
      &mut a,
      &mut same,
      &MutationContext::new("reviewer"),
      &Stamp::now("reviewer"),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidPair(_)));
  }

  #[test]
  fn rejected_faces_ignores_pair_entries() {
    let mut a = identity("a");
    a.negative_ids = vec![
      NegativeEntry::Face { face_id: "x".into() },
      NegativeEntry::IdentityPair { identity_id: uuid::Uuid::new_v4() },
    ];
    let faces = rejected_faces(&a);
    assert_eq!(faces.len(), 1);
    assert!(faces.contains(&&FaceId::from("x")));
  }
}
