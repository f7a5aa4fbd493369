use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// One row per appended transition. A duplicate nonce is a constraint
    /// violation, which aborts the surrounding append.
    pub fn insert_sync_log(&self, nonce: &str, timestamp: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sync_log (nonce, timestamp) VALUES (?1, ?2)",
            params![nonce, timestamp],
        )?;
        Ok(())
    }

    pub fn sync_log_contains(&self, nonce: &str) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM sync_log WHERE nonce = ?1",
                params![nonce],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn sync_log_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM sync_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_log_membership() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.sync_log_contains("n1").unwrap());
        db.insert_sync_log("n1", 10).unwrap();
        assert!(db.sync_log_contains("n1").unwrap());
        assert!(db.insert_sync_log("n1", 11).is_err());
        assert_eq!(db.sync_log_count().unwrap(), 1);
    }
}
