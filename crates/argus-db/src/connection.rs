use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use rusqlite::Connection;

use crate::error::Result;

/// Shared handle to the underlying SQLite connection.
///
/// Cloning is cheap; all clones refer to the same connection.
#[derive(Clone)]
pub struct Database {
    pub conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA case_sensitive_like = ON;",
        )?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA case_sensitive_like = ON;",
        )?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
    pub fn with_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        E: From<crate::error::DbError> + From<rusqlite::Error>,
        F: FnOnce(&rusqlite::Transaction) -> std::result::Result<T, E>,
    {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| crate::error::DbError::PoisonError)?;
        let tx = guard.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}
