use hsn_shared::types::now_secs;
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::InboxEntry;

impl Database {
    /// Keep a raw envelope exactly as received, before it is validated.
    /// An envelope already recorded for the same source and id is skipped;
    /// returns `false` in that case.
    pub fn insert_inbox(&self, envelope_id: Option<&str>, source: &str, record: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO inbox (envelope_id, source, record, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![envelope_id, source, record, now_secs()],
        )?;
        Ok(affected > 0)
    }

    pub fn list_inbox(&self) -> Result<Vec<InboxEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT seq, envelope_id, source, record, received_at FROM inbox ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(InboxEntry {
                seq: row.get(0)?,
                envelope_id: row.get(1)?,
                source: row.get(2)?,
                record: row.get(3)?,
                received_at: row.get(4)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn inbox_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM inbox", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_append_only() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_inbox(Some("env-1"), "http://relay", "{}").unwrap());
        assert!(db.insert_inbox(Some("env-1"), "http://other", "{}").unwrap());
        assert!(db.insert_inbox(None, "direct", r#"{"a":1}"#).unwrap());

        let entries = db.list_inbox().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].envelope_id.as_deref(), Some("env-1"));
        assert_eq!(entries[2].source, "direct");
        assert!(entries[0].seq < entries[1].seq);
        assert_eq!(db.inbox_count().unwrap(), 3);
    }

    #[test]
    fn test_repolled_envelope_recorded_once() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.insert_inbox(Some("env-1"), "http://relay", "{}").unwrap());
        for _ in 0..4 {
            assert!(!db.insert_inbox(Some("env-1"), "http://relay", "{}").unwrap());
        }
        assert_eq!(db.inbox_count().unwrap(), 1);
    }
}
