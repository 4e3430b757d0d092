//! Error types for argus-db.

use thiserror::Error;

/// Database error type for argus-db operations.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    #[error("SQLite database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(String),

    #[error("Thread lock poison error")]
    PoisonError,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::PoisonError
    }
}

/// Result type alias for argus-db operations.
pub type Result<T> = std::result::Result<T, DbError>;
