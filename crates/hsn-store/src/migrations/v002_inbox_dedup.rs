//! v002 -- One inbox row per gateway envelope.
//!
//! Envelopes that fail validation stay on the gateway and come back on every
//! poll. Collapse the copies already recorded and keep new ones out with a
//! unique index on `(source, envelope_id)`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
DELETE FROM inbox
 WHERE envelope_id IS NOT NULL
   AND seq NOT IN (
       SELECT MIN(seq) FROM inbox
        WHERE envelope_id IS NOT NULL
        GROUP BY source, envelope_id
   );

CREATE UNIQUE INDEX IF NOT EXISTS idx_inbox_source_envelope
    ON inbox(source, envelope_id);
"#;

/// Apply the inbox deduplication migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
