//! Install session error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstallError {
    /// A listed part is missing or zero-length; no session was opened.
    #[error("missing or empty install part: {part}")]
    MissingParts { part: String },

    /// The OS requested user confirmation but attached no confirmation
    /// intent to forward.
    #[error("installer requested confirmation but provided no intent")]
    ConfirmationMissing,

    /// Terminal installer failure, carrying the OS reason code and message.
    #[error("installation failed ({code}): {message}")]
    Failure { code: i32, message: String },

    #[error("installer reported unknown status {code}: {message}")]
    UnknownStatus { code: i32, message: String },

    /// The installer backend dropped the status stream before delivering
    /// a terminal result.
    #[error("install session closed without a result")]
    SessionClosed,

    #[error("installer backend error: {message}")]
    Backend { message: String },
}
