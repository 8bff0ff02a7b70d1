//! [`SqliteStore`], the SQLite implementation of [`IdentityStore`].

use std::{collections::BTreeSet, path::Path, sync::Arc, time::Duration};

use rusqlite::{OptionalExtension as _, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use likeness_core::{
  face::{CooccurrenceIndex, FaceId},
  history::{HistoryEvent, Stamp},
  identity::Identity,
  merge::{self, MergeOutcome, MergePlan, MergeRequest},
  mutation::{self, CandidateVerdict, MutationContext, NewIdentity, Transition},
  rejection,
  search::{self, NameVariants, SearchHit},
  store::{IdentityQuery, IdentityStore},
};

use crate::{
  Error, Result,
  encode::{EventRow, IdentityRow, decode_event, decode_identity, encode_uuid},
  schema::{SCHEMA, SCHEMA_VERSION},
};

/// How long a writer waits for another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Transaction plumbing ────────────────────────────────────────────────────

/// Failure inside a database closure: either the database itself, or a domain
/// refusal that must roll the transaction back.
enum TxError {
  Sql(rusqlite::Error),
  Core(likeness_core::Error),
}

impl From<rusqlite::Error> for TxError {
  fn from(e: rusqlite::Error) -> Self { Self::Sql(e) }
}

impl From<likeness_core::Error> for TxError {
  fn from(e: likeness_core::Error) -> Self { Self::Core(e) }
}

impl From<serde_json::Error> for TxError {
  fn from(e: serde_json::Error) -> Self { Self::Core(e.into()) }
}

type TxResult<T> = std::result::Result<T, TxError>;

// ─── Row access ──────────────────────────────────────────────────────────────

fn load(conn: &rusqlite::Connection, id: Uuid) -> TxResult<Option<Identity>> {
  let json: Option<String> = conn
    .query_row(
      "SELECT record_json FROM identities WHERE identity_id = ?1",
      rusqlite::params![encode_uuid(id)],
      |r| r.get(0),
    )
    .optional()?;
  Ok(json.as_deref().map(decode_identity).transpose()?)
}

fn require(conn: &rusqlite::Connection, id: Uuid) -> TxResult<Identity> {
  load(conn, id)?.ok_or(TxError::Core(likeness_core::Error::IdentityNotFound(id)))
}

fn load_many(
  conn: &rusqlite::Connection,
  query: &IdentityQuery,
) -> TxResult<Vec<Identity>> {
  let state: Option<&'static str> = query.state.map(Into::into);
  let mut stmt = conn.prepare_cached(
    "SELECT record_json FROM identities
     WHERE (?1 OR merged_into IS NULL)
       AND (?2 IS NULL OR state = ?2)
       AND (?2 IS NOT NULL OR ?3 OR state <> 'REJECTED')
     ORDER BY created_at, identity_id",
  )?;
  let params = rusqlite::params![query.include_merged, state, query.include_rejected];
  let rows = stmt
    .query_map(params, |r| {
      r.get::<_, String>(0)
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows
    .iter()
    .map(|json| Ok(decode_identity(json)?))
    .collect()
}

/// Live identities as shown to reviewers: not merged, not rejected.
fn load_active(conn: &rusqlite::Connection) -> TxResult<Vec<Identity>> {
  load_many(conn, &IdentityQuery::default())
}

/// Unmerged identities, rejected ones included. These own their faces.
fn load_holders(conn: &rusqlite::Connection) -> TxResult<Vec<Identity>> {
  load_many(conn, &IdentityQuery::holders())
}

fn save(tx: &Transaction<'_>, identity: &Identity) -> TxResult<()> {
  let row = IdentityRow::encode(identity)?;
  tx.execute(
    "INSERT INTO identities (
       identity_id, name, state, merged_into, version_id,
       created_at, updated_at, record_json
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(identity_id) DO UPDATE SET
       name        = excluded.name,
       state       = excluded.state,
       merged_into = excluded.merged_into,
       version_id  = excluded.version_id,
       updated_at  = excluded.updated_at,
       record_json = excluded.record_json",
    rusqlite::params![
      row.identity_id,
      row.name,
      row.state,
      row.merged_into,
      row.version_id,
      row.created_at,
      row.updated_at,
      row.record_json,
    ],
  )?;
  Ok(())
}

fn append(tx: &Transaction<'_>, event: &HistoryEvent) -> TxResult<()> {
  let row = EventRow::encode(event)?;
  tx.execute(
    "INSERT INTO history_events (event_id, identity_id, action, recorded_at, event_json)
     VALUES (?1, ?2, ?3, ?4, ?5)",
    rusqlite::params![
      row.event_id,
      row.identity_id,
      row.action,
      row.recorded_at,
      row.event_json,
    ],
  )?;
  Ok(())
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Likeness identity registry backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection and collaborators are
/// reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:     tokio_rusqlite::Connection,
  photos:   Arc<dyn CooccurrenceIndex + Send + Sync>,
  variants: Arc<NameVariants>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  ///
  /// `photos` is consulted by merges for the co-occurrence veto.
  pub async fn open(
    path: impl AsRef<Path>,
    photos: Arc<dyn CooccurrenceIndex + Send + Sync>,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, photos).await
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory(
    photos: Arc<dyn CooccurrenceIndex + Send + Sync>,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, photos).await
  }

  /// Replace the built-in name variant table used by search.
  pub fn with_name_variants(mut self, variants: NameVariants) -> Self {
    self.variants = Arc::new(variants);
    self
  }

  async fn init(
    conn: tokio_rusqlite::Connection,
    photos: Arc<dyn CooccurrenceIndex + Send + Sync>,
  ) -> Result<Self> {
    let found = conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let version: i64 =
          conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if version <= SCHEMA_VERSION {
          conn.execute_batch(SCHEMA)?;
        }
        Ok(version)
      })
      .await?;
    if found > SCHEMA_VERSION {
      return Err(Error::UnsupportedSchema { found, supported: SCHEMA_VERSION });
    }

    Ok(Self { conn, photos, variants: Arc::new(NameVariants::builtin()) })
  }

  /// Run `f` inside one `IMMEDIATE` transaction. The transaction commits only
  /// when `f` succeeds; any error rolls it back.
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Transaction<'_>) -> TxResult<T> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
          Ok(value) => {
            tx.commit()?;
            Ok(Ok(value))
          }
          Err(TxError::Sql(e)) => Err(e.into()),
          Err(TxError::Core(e)) => Ok(Err(e)),
        }
      })
      .await?;
    Ok(outcome?)
  }

  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> TxResult<T> + Send + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| match f(conn) {
        Ok(value) => Ok(Ok(value)),
        Err(TxError::Sql(e)) => Err(e.into()),
        Err(TxError::Core(e)) => Ok(Err(e)),
      })
      .await?;
    Ok(outcome?)
  }

  /// Load, mutate and save a single identity with one history event.
  async fn mutate_one<F>(&self, id: Uuid, ctx: MutationContext, f: F) -> Result<Identity>
  where
    F: FnOnce(&mut Identity, &MutationContext, &Stamp) -> likeness_core::Result<HistoryEvent>
      + Send
      + 'static,
  {
    self
      .write(move |tx| {
        let mut identity = require(tx, id)?;
        let stamp = ctx.stamp();
        let event = f(&mut identity, &ctx, &stamp)?;
        save(tx, &identity)?;
        append(tx, &event)?;
        Ok(identity)
      })
      .await
  }
}

fn refused(op: &str, id: Uuid, result: &Result<impl Sized>) {
  if let Err(e) = result {
    warn!(identity_id = %id, error = %e, "{op} refused");
  }
}

// ─── IdentityStore impl ──────────────────────────────────────────────────────

impl IdentityStore for SqliteStore {
  type Error = Error;

  // ── Registry ──────────────────────────────────────────────────────────────

  async fn create_identity(&self, input: NewIdentity) -> Result<Identity> {
    let mut created = self.create_identities(vec![input]).await?;
    created.pop().ok_or(Error::Core(likeness_core::Error::EmptyIdentity))
  }

  async fn create_identities(&self, inputs: Vec<NewIdentity>) -> Result<Vec<Identity>> {
    let created = self
      .write(move |tx| {
        let mut held = load_holders(tx)?;
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
          let stamp = Stamp::now(input.actor.clone());
          let (identity, event) = mutation::create(input, &stamp)?;
          let faces: Vec<FaceId> = identity.faces().cloned().collect();
          mutation::ensure_unassigned(&faces, &held)?;
          save(tx, &identity)?;
          append(tx, &event)?;
          held.push(identity.clone());
          created.push(identity);
        }
        Ok(created)
      })
      .await;

    match &created {
      Ok(list) => info!(count = list.len(), "identities created"),
      Err(e) => warn!(error = %e, "identity creation refused"),
    }
    created
  }

  async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>> {
    self.read(move |conn| load(conn, id)).await
  }

  async fn list_identities(&self, query: IdentityQuery) -> Result<Vec<Identity>> {
    let listed = self.read(move |conn| load_many(conn, &query)).await?;
    debug!(count = listed.len(), "identities listed");
    Ok(listed)
  }

  async fn search_identities<'a>(
    &'a self,
    query: &'a str,
    expand_variants: bool,
  ) -> Result<Vec<SearchHit>> {
    let active = self.read(load_active).await?;
    let variants = expand_variants.then_some(self.variants.as_ref());
    let hits = search::rank(&active, query, variants);
    debug!(query, expand_variants, hits = hits.len(), "search");
    Ok(hits)
  }

  // ── Single-identity mutations ─────────────────────────────────────────────

  async fn transition(
    &self,
    id: Uuid,
    transition: Transition,
    ctx: MutationContext,
  ) -> Result<Identity> {
    let result = self
      .mutate_one(id, ctx, move |identity, ctx, stamp| {
        mutation::transition(identity, transition, ctx, stamp)
      })
      .await;
    refused("transition", id, &result);
    result
  }

  async fn rename(
    &self,
    id: Uuid,
    name: Option<String>,
    ctx: MutationContext,
  ) -> Result<Identity> {
    let result = self
      .mutate_one(id, ctx, move |identity, ctx, stamp| {
        mutation::rename(identity, name, ctx, stamp)
      })
      .await;
    refused("rename", id, &result);
    result
  }

  async fn detach_face(
    &self,
    id: Uuid,
    face_id: FaceId,
    ctx: MutationContext,
  ) -> Result<(Identity, Identity)> {
    let face = face_id.clone();
    let result = self
      .write(move |tx| {
        let source = require(tx, id)?;
        let out = mutation::detach(source, &face, &ctx, &ctx.stamp())?;
        save(tx, &out.source)?;
        save(tx, &out.detached)?;
        for event in &out.events {
          append(tx, event)?;
        }
        Ok((out.source, out.detached))
      })
      .await;

    match &result {
      Ok((_, detached)) => info!(
        identity_id = %id,
        face_id = %face_id,
        new_identity_id = %detached.identity_id,
        "face detached"
      ),
      Err(e) => warn!(identity_id = %id, face_id = %face_id, error = %e, "detach refused"),
    }
    result
  }

  async fn review_candidate(
    &self,
    id: Uuid,
    face_id: FaceId,
    verdict: CandidateVerdict,
    ctx: MutationContext,
  ) -> Result<Identity> {
    let result = self
      .mutate_one(id, ctx, move |identity, ctx, stamp| {
        mutation::review_candidate(identity, &face_id, verdict, ctx, stamp)
      })
      .await;
    refused("candidate review", id, &result);
    result
  }

  // ── Rejection memory ──────────────────────────────────────────────────────

  async fn reject_pair(
    &self,
    a: Uuid,
    b: Uuid,
    ctx: MutationContext,
  ) -> Result<(Identity, Identity)> {
    let result = self
      .write(move |tx| {
        let (mut x, mut y) = (require(tx, a)?, require(tx, b)?);
        let events = rejection::reject_pair(&mut x, &mut y, &ctx, &ctx.stamp())?;
        save(tx, &x)?;
        save(tx, &y)?;
        for event in &events {
          append(tx, event)?;
        }
        Ok((x, y))
      })
      .await;
    refused("pair rejection", a, &result);
    result
  }

  async fn unreject_pair(
    &self,
    a: Uuid,
    b: Uuid,
    ctx: MutationContext,
  ) -> Result<(Identity, Identity)> {
    let result = self
      .write(move |tx| {
        let (mut x, mut y) = (require(tx, a)?, require(tx, b)?);
        let events = rejection::unreject_pair(&mut x, &mut y, &ctx, &ctx.stamp())?;
        save(tx, &x)?;
        save(tx, &y)?;
        for event in &events {
          append(tx, event)?;
        }
        Ok((x, y))
      })
      .await;
    refused("pair unrejection", a, &result);
    result
  }

  // ── Merge and undo ────────────────────────────────────────────────────────

  async fn merge(&self, request: MergeRequest) -> Result<MergeOutcome> {
    let (target_id, source_id) = (request.target_id, request.source_id);
    let photos = Arc::clone(&self.photos);

    let result = self
      .write(move |tx| {
        let target = require(tx, request.target_id)?;
        let source = require(tx, request.source_id)?;
        let stamp = Stamp::now(request.actor.clone());
        match merge::plan_merge(target, source, &request, photos.as_ref(), &stamp)? {
          MergePlan::Conflict(conflict) => Ok(MergeOutcome::NameConflict(conflict)),
          MergePlan::Apply(applied) => {
            save(tx, &applied.target)?;
            save(tx, &applied.source)?;
            append(tx, &applied.event)?;
            Ok(applied.outcome())
          }
        }
      })
      .await;

    match &result {
      Ok(MergeOutcome::Merged(merged)) => info!(
        target_id = %merged.target.identity_id,
        source_id = %merged.source_id,
        faces = merged.faces_added.face_count(),
        auto_corrected = merged.direction_auto_corrected,
        "identities merged"
      ),
      Ok(MergeOutcome::NameConflict(_)) => warn!(
        target_id = %target_id,
        source_id = %source_id,
        "merge blocked by name conflict"
      ),
      Err(e) => warn!(
        target_id = %target_id,
        source_id = %source_id,
        error = %e,
        "merge refused"
      ),
    }
    result
  }

  async fn undo_merge(&self, id: Uuid, ctx: MutationContext) -> Result<Identity> {
    let result = self
      .write(move |tx| {
        let target = require(tx, id)?;
        let source_id = merge::undo_source(&target)?;
        let source = require(tx, source_id)?;
        let held_elsewhere: BTreeSet<FaceId> = load_holders(tx)?
          .into_iter()
          .filter(|i| i.identity_id != id)
          .flat_map(|i| i.anchor_ids.into_iter().chain(i.candidate_ids))
          .collect();

        let undone =
          merge::plan_undo(target, source, &held_elsewhere, &ctx, &ctx.stamp())?;
        save(tx, &undone.target)?;
        save(tx, &undone.source)?;
        append(tx, &undone.event)?;
        Ok((undone.target, undone.source.identity_id, undone.missing.len()))
      })
      .await;

    match result {
      Ok((target, source_id, missing)) => {
        info!(
          target_id = %id,
          source_id = %source_id,
          faces_missing = missing,
          "merge undone"
        );
        Ok(target)
      }
      Err(e) => {
        warn!(identity_id = %id, error = %e, "undo refused");
        Err(e)
      }
    }
  }

  // ── History ───────────────────────────────────────────────────────────────

  async fn history(&self, identity_id: Option<Uuid>) -> Result<Vec<HistoryEvent>> {
    self
      .read(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT event_json FROM history_events
           WHERE (?1 IS NULL OR identity_id = ?1)
           ORDER BY seq",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![identity_id.map(encode_uuid)], |r| {
            r.get::<_, String>(0)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
          .iter()
          .map(|json| Ok(decode_event(json)?))
          .collect()
      })
      .await
  }
}
