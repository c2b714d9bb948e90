//! Error types for the piece hashing pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by a hashing run.
///
/// Every variant is reported before any digest bytes reach the caller; a
/// failed run never exposes a partially filled buffer.
#[derive(Debug, Error)]
pub enum HashError {
    /// An input file is missing, not a regular file, or unreadable
    #[error("invalid input {}: {reason}", path.display())]
    Validation {
        /// Offending path
        path: PathBuf,
        /// Why the path was rejected
        reason: String,
    },

    /// The file set holds no bytes
    #[error("file set is empty: at least one byte of content is required")]
    EmptyInput,

    /// Piece length must be positive
    #[error("invalid piece length: {0}")]
    InvalidPieceLength(usize),

    /// The digest buffer would not be addressable on this platform
    #[error("too many pieces: {0}")]
    TooManyPieces(u64),

    /// The slicer produced a different number of chunks than precomputed
    #[error("internal consistency fault: produced {produced} pieces, expected {expected}")]
    PieceCountMismatch {
        /// Chunks actually produced
        produced: u64,
        /// Precomputed piece count
        expected: u64,
    },

    /// Computing the digest of one piece failed
    #[error("piece {piece} failed: {reason}")]
    PieceFailed {
        /// Index of the failed piece
        piece: usize,
        /// Failure description
        reason: String,
    },

    /// The run was cancelled before every piece completed
    #[error("hashing cancelled")]
    Cancelled,

    /// The completion wait expired with pieces outstanding
    #[error("hashing timed out with {outstanding} pieces outstanding")]
    Timeout {
        /// Pieces not yet completed
        outstanding: usize,
    },

    /// I/O error while mapping or reading input
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HashError {
    /// Build a validation error for `path`
    pub fn validation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error was raised before any work was scheduled
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::EmptyInput
                | Self::InvalidPieceLength(_)
                | Self::TooManyPieces(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(HashError::EmptyInput.is_validation());
        assert!(HashError::InvalidPieceLength(0).is_validation());
        assert!(HashError::validation("/nope", "not found").is_validation());
        assert!(!HashError::Cancelled.is_validation());
        assert!(
            !HashError::PieceCountMismatch {
                produced: 1,
                expected: 2
            }
            .is_validation()
        );
    }

    #[test]
    fn test_display() {
        let err = HashError::validation("/tmp/x", "not a regular file");
        assert_eq!(err.to_string(), "invalid input /tmp/x: not a regular file");

        let err = HashError::PieceCountMismatch {
            produced: 3,
            expected: 4,
        };
        assert!(err.to_string().contains("produced 3 pieces, expected 4"));
    }
}
