//! Download and network error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NetworkError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported protocol: {protocol}")]
    UnsupportedProtocol { protocol: String },

    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("download timed out: {url}")]
    Timeout { url: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("download failed after {attempts} attempts: {url}")]
    RetriesExhausted { url: String, attempts: u32 },
}

impl NetworkError {
    /// Network failures are the only retryable family in the pipeline.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            NetworkError::InvalidUrl(_) | NetworkError::UnsupportedProtocol { .. }
        )
    }
}
