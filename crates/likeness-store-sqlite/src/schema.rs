//! SQL schema for the Likeness SQLite store.
//!
//! `PRAGMA user_version` carries the schema version. Future migrations will be
//! gated on that number.

pub const SCHEMA_VERSION: i64 = 1;

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per identity, soft-deleted ones included. `record_json` is the
-- authoritative record; the other columns are kept in step for filtering.
CREATE TABLE IF NOT EXISTS identities (
    identity_id  TEXT PRIMARY KEY,
    name         TEXT,
    state        TEXT NOT NULL,      -- 'INBOX' | 'PROPOSED' | ... | 'SKIPPED'
    merged_into  TEXT,               -- NULL while active
    version_id   INTEGER NOT NULL CHECK (version_id >= 1),
    created_at   TEXT NOT NULL,      -- ISO 8601 UTC
    updated_at   TEXT NOT NULL,
    record_json  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS identities_state_idx   ON identities(state);
CREATE INDEX IF NOT EXISTS identities_merged_idx  ON identities(merged_into);
CREATE INDEX IF NOT EXISTS identities_created_idx ON identities(created_at);

-- The global history log. Strictly append-only.
CREATE TABLE IF NOT EXISTS history_events (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id     TEXT NOT NULL UNIQUE,
    identity_id  TEXT NOT NULL,
    action       TEXT NOT NULL,
    recorded_at  TEXT NOT NULL,
    event_json   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS history_identity_idx ON history_events(identity_id);

CREATE TRIGGER IF NOT EXISTS history_events_no_update
BEFORE UPDATE ON history_events
BEGIN
    SELECT RAISE(ABORT, 'history events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS history_events_no_delete
BEFORE DELETE ON history_events
BEGIN
    SELECT RAISE(ABORT, 'history events are append-only');
END;

PRAGMA user_version = 1;
";
