//! Signing identity and package signing error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SigningError {
    /// Key or certificate generation failed. Fatal for the current
    /// operation: key material must not be left partially persisted, so
    /// any partial keystore file has already been deleted.
    #[error("keystore creation failed: {message}")]
    KeystoreCreation { message: String },

    #[error("keystore file is corrupt: {message}")]
    KeystoreCorrupt { message: String },

    #[error("package signing failed: {message}")]
    Signing { message: String },

    #[error("cannot open package for signing: {path}: {message}")]
    InvalidPackage { path: String, message: String },
}
