use hsn_shared::{ChainId, Fingerprint, Sta};
use rusqlite::params;
use serde_json::Value;

use crate::database::Database;
use crate::error::Result;
use crate::models::StoredMessage;

impl Database {
    pub fn insert_message(&self, sta: &Sta, text: &str) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO messages (chain_id, nonce, from_fp, to_fp, timestamp, text, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sta.chain_id().as_str(),
                sta.nonce,
                sta.from.as_str(),
                sta.to.as_str(),
                sta.timestamp,
                text,
                sta.payload.to_value().to_string(),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Every materialized message, in append order.
    pub fn list_messages(&self) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, chain_id, nonce, from_fp, to_fp, timestamp, text, payload
             FROM messages ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn messages_for_chain(&self, chain: &ChainId) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, chain_id, nonce, from_fp, to_fp, timestamp, text, payload
             FROM messages WHERE chain_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![chain.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let payload_str: String = row.get(7)?;
    let payload: Value = serde_json::from_str(&payload_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StoredMessage {
        seq: row.get(0)?,
        chain_id: ChainId(row.get(1)?),
        nonce: row.get(2)?,
        from: Fingerprint(row.get(3)?),
        to: Fingerprint(row.get(4)?),
        timestamp: row.get(5)?,
        text: row.get(6)?,
        payload,
    })
}
