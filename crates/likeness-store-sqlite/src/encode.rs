//! Encoding and decoding helpers between domain types and SQLite rows.
//!
//! Timestamps are stored as RFC 3339 strings and UUIDs as hyphenated
//! lowercase strings. Full records are stored as compact JSON next to the
//! columns used for filtering.

use chrono::{DateTime, SecondsFormat, Utc};
use likeness_core::{history::HistoryEvent, identity::Identity};
use uuid::Uuid;

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

/// Fixed-width so that text order is time order.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// ─── Identity ────────────────────────────────────────────────────────────────

/// Column values for one `identities` row.
pub struct IdentityRow {
  pub identity_id: String,
  pub name:        Option<String>,
  pub state:       &'static str,
  pub merged_into: Option<String>,
  pub version_id:  i64,
  pub created_at:  String,
  pub updated_at:  String,
  pub record_json: String,
}

impl IdentityRow {
  pub fn encode(identity: &Identity) -> serde_json::Result<Self> {
    Ok(Self {
      identity_id: encode_uuid(identity.identity_id),
      name:        identity.name.clone(),
      state:       identity.state.into(),
      merged_into: identity.merged_into().map(encode_uuid),
      version_id:  i64::try_from(identity.version_id).unwrap_or(i64::MAX),
      created_at:  encode_dt(identity.created_at),
      updated_at:  encode_dt(identity.updated_at),
      record_json: serde_json::to_string(identity)?,
    })
  }
}

pub fn decode_identity(record_json: &str) -> serde_json::Result<Identity> {
  serde_json::from_str(record_json)
}

// ─── HistoryEvent ────────────────────────────────────────────────────────────

/// Column values for one `history_events` row.
pub struct EventRow {
  pub event_id:    String,
  pub identity_id: String,
  pub action:      &'static str,
  pub recorded_at: String,
  pub event_json:  String,
}

impl EventRow {
  pub fn encode(event: &HistoryEvent) -> serde_json::Result<Self> {
    Ok(Self {
      event_id:    encode_uuid(event.event_id),
      identity_id: encode_uuid(event.identity_id),
      action:      event.action.into(),
      recorded_at: encode_dt(event.recorded_at),
      event_json:  serde_json::to_string(event)?,
    })
  }
}

pub fn decode_event(event_json: &str) -> serde_json::Result<HistoryEvent> {
  serde_json::from_str(event_json)
}
