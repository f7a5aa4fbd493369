//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. [`Store`] is the shareable
//! handle the async layers hold; every access goes through one lock, so a
//! closure passed to [`Store::with`] sees a consistent view of all tables.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/hsn/hsn.db`
    /// - macOS:   `~/Library/Application Support/net.hsn.hsn/hsn.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\hsn\hsn\data\hsn.db`
    pub fn new() -> Result<Self> {
        Self::open_at(&default_path()?)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::init(conn)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// Every table helper called on `db` inside the closure joins the
    /// transaction. It commits only when `f` returns `Ok`; an error (or a
    /// panic) drops the transaction, which rolls it back. Transactions do not
    /// nest.
    pub fn transaction<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Default on-disk location of the database file.
pub fn default_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("net", "hsn", "hsn").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().join("hsn.db"))
}

/// Cloneable, thread-safe handle to one [`Database`].
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` with exclusive access to the database.
    ///
    /// Keep closures short; the lock is a plain mutex and async callers
    /// block their worker thread while holding it.
    pub fn with<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        f(&db)
    }

    /// Shorthand for `with(|db| db.transaction(f))`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        self.with(|db| db.transaction(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn test_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        drop(db);

        // Reopening runs migrations again without error.
        Database::open_at(&path).expect("should reopen");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.transaction(|db| {
            db.conn().execute(
                "INSERT INTO sync_log (nonce, timestamp) VALUES (?1, ?2)",
                params!["n1", 1],
            )?;
            Err(StoreError::NotFound)
        });
        assert!(matches!(result, Err(StoreError::NotFound)));

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM sync_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_commits() {
        let store = Store::open_in_memory().unwrap();
        store
            .transaction(|db| {
                db.conn().execute(
                    "INSERT INTO sync_log (nonce, timestamp) VALUES (?1, ?2)",
                    params!["n1", 1],
                )?;
                Ok(())
            })
            .unwrap();

        let count: i64 = store
            .with(|db| {
                Ok(db
                    .conn()
                    .query_row("SELECT COUNT(*) FROM sync_log", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
