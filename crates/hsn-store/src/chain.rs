use hsn_shared::{ChainId, Sta};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::ChainEntry;

impl Database {
    /// Append one transition row. Callers run this inside a transaction
    /// together with the sync-log and projection writes.
    pub fn insert_chain_entry(&self, sta: &Sta) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO state_chain
                (chain_id, nonce, kind, from_fp, to_fp, timestamp, prev_state_hash, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sta.chain_id().as_str(),
                sta.nonce,
                sta.kind(),
                sta.from.as_str(),
                sta.to.as_str(),
                sta.timestamp,
                sta.prev_state_hash,
                sta.canonical(),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Canonical record and timestamp of the newest entry in `chain`.
    pub fn chain_tail(&self, chain: &ChainId) -> Result<Option<(String, i64)>> {
        let tail = self
            .conn()
            .query_row(
                "SELECT record, timestamp FROM state_chain
                 WHERE chain_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![chain.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(tail)
    }

    pub fn chain_contains_nonce(&self, nonce: &str) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM state_chain WHERE nonce = ?1",
                params![nonce],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All entries of `chain`, oldest first.
    pub fn chain_entries(&self, chain: &ChainId) -> Result<Vec<ChainEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, chain_id, record FROM state_chain
             WHERE chain_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![chain.as_str()], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn chain_len(&self, chain: &ChainId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM state_chain WHERE chain_id = ?1",
            params![chain.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChainEntry> {
    let seq: i64 = row.get(0)?;
    let chain_id: String = row.get(1)?;
    let record: String = row.get(2)?;

    let sta: Sta = serde_json::from_str(&record).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ChainEntry {
        seq,
        chain_id: ChainId(chain_id),
        sta,
        record,
    })
}
