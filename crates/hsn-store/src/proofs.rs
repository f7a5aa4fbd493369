use hsn_shared::types::now_secs;
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::ProofRecord;

impl Database {
    /// Append an opaque proof blob, optionally tied to a transition nonce.
    pub fn insert_proof(&self, nonce: Option<&str>, blob: &[u8]) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO proofs (nonce, blob, created_at) VALUES (?1, ?2, ?3)",
            params![nonce, blob, now_secs()],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn proofs_for(&self, nonce: &str) -> Result<Vec<ProofRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, nonce, blob, created_at FROM proofs WHERE nonce = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![nonce], |row| {
            Ok(ProofRecord {
                seq: row.get(0)?,
                nonce: row.get(1)?,
                blob: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut proofs = Vec::new();
        for row in rows {
            proofs.push(row?);
        }
        Ok(proofs)
    }
}
