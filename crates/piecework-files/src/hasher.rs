//! Piece digest policy.

use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

/// Computes the digest of one piece into a caller-provided slot.
///
/// Implementations must be deterministic: the same bytes always produce the
/// same digest, whichever thread runs them.
pub trait PieceHasher: Send + Sync {
    /// Width of one digest in bytes
    fn digest_size(&self) -> usize;

    /// Hash `data` into `out`, which is exactly [`digest_size`] bytes long.
    ///
    /// [`digest_size`]: PieceHasher::digest_size
    ///
    /// # Errors
    ///
    /// Returns a description of the failure; the run it belongs to fails.
    fn hash_piece(&self, data: &[u8], out: &mut [u8]) -> Result<(), String>;
}

/// Built-in piece digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// SHA-1 (20 bytes), the BitTorrent v1 piece digest
    #[default]
    Sha1,
    /// BLAKE3 (32 bytes)
    Blake3,
}

impl DigestAlgorithm {
    /// Digest width in bytes
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Blake3 => 32,
        }
    }

    /// Hash `data` and return the digest as an owned vector
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        }
    }
}

impl PieceHasher for DigestAlgorithm {
    fn digest_size(&self) -> usize {
        self.size()
    }

    fn hash_piece(&self, data: &[u8], out: &mut [u8]) -> Result<(), String> {
        if out.len() != self.size() {
            return Err(format!(
                "digest slot is {} bytes, expected {}",
                out.len(),
                self.size()
            ));
        }
        match self {
            Self::Sha1 => out.copy_from_slice(&Sha1::digest(data)),
            Self::Blake3 => out.copy_from_slice(blake3::hash(data).as_bytes()),
        }
        Ok(())
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "sha1"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "unknown digest algorithm: {other} (expected sha1 or blake3)"
            )),
        }
    }
}
