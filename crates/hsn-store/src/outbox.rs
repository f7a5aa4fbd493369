use hsn_shared::types::now_secs;
use hsn_shared::{Fingerprint, Sta};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::OutboxEntry;

impl Database {
    /// Record `sta` as not yet delivered. Inserting the same nonce twice is a
    /// no-op; returns whether a row was written.
    pub fn insert_outbox(&self, sta: &Sta) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO outbox (nonce, to_fp, record, created_at, attempts)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![sta.nonce, sta.to.as_str(), sta.canonical(), now_secs()],
        )?;
        Ok(affected > 0)
    }

    /// Idempotent: deleting an absent nonce succeeds and returns `false`.
    pub fn delete_outbox(&self, nonce: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM outbox WHERE nonce = ?1", params![nonce])?;
        Ok(affected > 0)
    }

    pub fn outbox_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn outbox_contains(&self, nonce: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM outbox WHERE nonce = ?1",
            params![nonce],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Pending entries, oldest first.
    pub fn list_outbox(&self) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT nonce, to_fp, record, created_at, attempts, last_attempt_at
             FROM outbox ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Note a failed delivery attempt.
    pub fn record_outbox_attempt(&self, nonce: &str, at: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE outbox SET attempts = attempts + 1, last_attempt_at = ?2 WHERE nonce = ?1",
            params![nonce, at],
        )?;
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let record: String = row.get(2)?;
    let sta: Sta = serde_json::from_str(&record).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(OutboxEntry {
        nonce: row.get(0)?,
        to: Fingerprint(row.get(1)?),
        sta,
        created_at: row.get(3)?,
        attempts: row.get(4)?,
        last_attempt_at: row.get(5)?,
    })
}
