//! Error types for the upload ledger.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the database file.
    #[error("Failed to open ledger at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a schema migration.
    #[error("Ledger migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("Ledger query failed: {0}")]
    Query(String),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// A previous ledger operation panicked while holding the connection.
    #[error("Ledger connection poisoned: {0}")]
    Poisoned(String),

    /// A history row carries a status this version does not know.
    #[error("History entry {id} has unknown status '{status}'")]
    UnknownHistoryStatus { id: i64, status: String },

    /// The database schema version is newer than supported.
    #[error("Ledger schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StateError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}
