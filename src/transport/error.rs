use thiserror::Error;

/// Failures talking to the storage API.
///
/// `is_retryable()` separates transient failures (network, timeouts, rate
/// limits, server errors) from permanent ones so callers can stop early.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Storage API unavailable ({endpoint}): {source}")]
    Unavailable {
        endpoint: String,
        source: reqwest::Error,
    },

    #[error("Storage API call to {endpoint} timed out after {secs}s")]
    Timeout { endpoint: String, secs: u64 },

    #[error("Storage API rejected {endpoint} (HTTP {status}): {message}")]
    Rejected {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Storage API returned an empty response for {endpoint}")]
    EmptyResponse { endpoint: String },

    #[error("Failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::Timeout { .. } => true,
            Self::Rejected { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::EmptyResponse { .. } | Self::Decode { .. } => false,
        }
    }

    /// Map a reqwest send/body error, promoting client timeouts to `Timeout`.
    pub(crate) fn from_reqwest(endpoint: &str, timeout_secs: u64, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                endpoint: endpoint.to_string(),
                secs: timeout_secs,
            }
        } else {
            Self::Unavailable {
                endpoint: endpoint.to_string(),
                source,
            }
        }
    }
}
