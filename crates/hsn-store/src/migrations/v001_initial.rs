//! v001 -- Initial schema creation.
//!
//! Creates the seven tables: `identity`, `state_chain`, `messages`, `proofs`,
//! `outbox`, `inbox` and `sync_log`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Identity (singleton row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS identity (
    id               INTEGER PRIMARY KEY CHECK (id = 1),
    fingerprint      TEXT NOT NULL,
    sign_secret      TEXT NOT NULL,               -- hex-encoded Ed25519 seed
    agreement_secret TEXT NOT NULL,               -- hex-encoded X25519 scalar
    created_at       INTEGER NOT NULL             -- unix seconds
);

-- ----------------------------------------------------------------
-- State chain (append-only, insertion ordered)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS state_chain (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    chain_id        TEXT NOT NULL,                -- "<low fp>:<high fp>"
    nonce           TEXT NOT NULL UNIQUE,
    kind            TEXT NOT NULL,                -- STA "type"
    from_fp         TEXT NOT NULL,
    to_fp           TEXT NOT NULL,
    timestamp       INTEGER NOT NULL,
    prev_state_hash TEXT NOT NULL,
    record          TEXT NOT NULL                 -- canonical JSON of the full STA
);

CREATE INDEX IF NOT EXISTS idx_state_chain_chain_seq
    ON state_chain(chain_id, seq DESC);

-- ----------------------------------------------------------------
-- Materialized messages (projection of chat.append)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    chain_id  TEXT NOT NULL,
    nonce     TEXT NOT NULL UNIQUE,
    from_fp   TEXT NOT NULL,
    to_fp     TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    text      TEXT NOT NULL,
    payload   TEXT NOT NULL                       -- full payload JSON
);

CREATE INDEX IF NOT EXISTS idx_messages_chain_seq
    ON messages(chain_id, seq);

-- ----------------------------------------------------------------
-- Proofs (append-only blobs)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS proofs (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    nonce      TEXT,
    blob       BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Outbox (one row per unconfirmed STA)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS outbox (
    nonce           TEXT PRIMARY KEY NOT NULL,
    to_fp           TEXT NOT NULL,
    record          TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    attempts        INTEGER NOT NULL DEFAULT 0,
    last_attempt_at INTEGER
);

-- ----------------------------------------------------------------
-- Inbox (raw envelopes received by polling, before validation)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS inbox (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    envelope_id TEXT,
    source      TEXT NOT NULL,
    record      TEXT NOT NULL,
    received_at INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Sync log (one row per appended STA)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sync_log (
    nonce     TEXT PRIMARY KEY NOT NULL,
    timestamp INTEGER NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
