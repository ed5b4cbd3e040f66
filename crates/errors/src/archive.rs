//! Archive validation and extraction error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArchiveError {
    #[error("archive missing: {path}")]
    Missing { path: String },

    #[error("archive is empty: {path}")]
    Empty { path: String },

    #[error("archive is not a valid zip: {path}: {message}")]
    Invalid { path: String, message: String },

    #[error("archive contains no entries: {path}")]
    NoEntries { path: String },

    /// Path traversal attempt ("zip slip"). Always fatal; the partially
    /// extracted tree is deliberately left in place for inspection.
    #[error("archive entry escapes extraction root: {entry}")]
    SecurityViolation { entry: String },

    #[error("extraction failed: {message}")]
    ExtractionFailed { message: String },

    #[error("entry not found in archive: {name}")]
    EntryNotFound { name: String },

    #[error("repack failed: {message}")]
    RepackFailed { message: String },
}
