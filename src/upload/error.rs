use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum UploadError {
    /// Item bytes could not be read at submission time. Fails only that item.
    #[error("Failed to read {key}: {source}")]
    LocalRead {
        key: String,
        source: std::io::Error,
    },

    /// The batch call failed. Fails every item in the batch.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
