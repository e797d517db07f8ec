use std::path::PathBuf;

use thiserror::Error;

/// Failures enumerating the local media source.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Failed to scan media directory {path}: {source}")]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),
}
