//! Error types for manifest handling.

use crate::bencode::DecodeError;
use piecework_files::HashError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, parsing, or verifying a manifest
#[derive(Debug, Error)]
pub enum MetaError {
    /// Malformed bencode
    #[error("bencode error: {0}")]
    Decode(#[from] DecodeError),

    /// A required manifest field is absent
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A manifest field has the wrong type or an unusable value
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name as it appears in the manifest
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// A tracker URL could not be used
    #[error("invalid tracker URL {url}: {reason}")]
    InvalidTracker {
        /// The URL as given
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Content on disk does not have the size the manifest records
    #[error("content size mismatch for {}: expected {expected} bytes, found {actual}", path.display())]
    ContentSize {
        /// File on disk
        path: PathBuf,
        /// Length recorded in the manifest
        expected: u64,
        /// Length found on disk
        actual: u64,
    },

    /// Hashing failed
    #[error(transparent)]
    Hash(#[from] HashError),

    /// I/O error reading or writing a manifest
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetaError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Result alias for manifest operations
pub type Result<T> = std::result::Result<T, MetaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = MetaError::invalid("piece length", "must be positive");
        assert_eq!(err.to_string(), "invalid field piece length: must be positive");

        let err: MetaError = HashError::EmptyInput.into();
        assert!(err.to_string().contains("empty"));

        let err: MetaError = DecodeError::TrailingData(4).into();
        assert_eq!(err.to_string(), "bencode error: trailing data at offset 4");
    }
}
