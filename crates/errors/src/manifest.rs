//! Binary manifest decode/encode/rewrite error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ManifestError {
    /// Malformed binary structure. There is no partial-output recovery;
    /// the caller must re-extract from a clean archive copy.
    #[error("manifest parse error: {message}")]
    Parse { message: String },

    #[error("unrecognized chunk type 0x{ty:04x} at offset {offset}")]
    UnknownChunk { ty: u16, offset: u64 },

    #[error("string pool reference out of range: {index}")]
    BadStringRef { index: i32 },

    #[error("manifest rewrite error: {message}")]
    Rewrite { message: String },

    #[error("manifest encode error: {message}")]
    Encode { message: String },
}
