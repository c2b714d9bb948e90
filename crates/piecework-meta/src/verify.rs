//! Content verification against a manifest.
//!
//! Re-hashes the files a manifest describes and compares every piece with
//! the recorded digest. Verification is all-or-nothing per run: there is no
//! partial resume.

use crate::error::{MetaError, Result};
use crate::metainfo::Metainfo;
use piecework_files::{
    DigestAlgorithm, FileSet, HashOptions, PIECE_HASH_SIZE, WorkerPool, hash_files,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of a verification run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Pieces checked
    pub pieces: usize,
    /// Bytes hashed
    pub total_length: u64,
    /// Indices of pieces whose digest differs, ascending
    pub mismatched: Vec<usize>,
}

impl VerifyReport {
    /// Whether every piece matched
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.mismatched.is_empty()
    }

    /// Number of matching pieces
    #[must_use]
    pub fn matched(&self) -> usize {
        self.pieces - self.mismatched.len()
    }
}

/// Verify content under `content_root` with default options.
///
/// For a single-file manifest `content_root` may be the file itself or the
/// directory that contains it; for a multi-file manifest it is the torrent
/// directory.
///
/// # Errors
///
/// See [`verify_content_with`].
pub fn verify_content(
    meta: &Metainfo,
    content_root: &Path,
    pool: &WorkerPool,
) -> Result<VerifyReport> {
    verify_content_with(meta, content_root, pool, HashOptions::default())
}

/// Verify content using the cancellation, progress, and timeout settings of
/// `options`. Its piece length and hasher are replaced by the manifest's.
///
/// # Errors
///
/// Returns [`MetaError::ContentSize`] if a file's size differs from the
/// manifest, or [`MetaError::Hash`] if a file is missing or hashing fails.
pub fn verify_content_with(
    meta: &Metainfo,
    content_root: &Path,
    pool: &WorkerPool,
    options: HashOptions,
) -> Result<VerifyReport> {
    let info = &meta.info;
    let root = resolve_root(meta, content_root);
    let entries = info.content_paths(&root);

    for (path, expected) in &entries {
        // A missing file falls through to the file-set validation error.
        if let Ok(found) = fs::metadata(path) {
            if found.is_file() && found.len() != *expected {
                return Err(MetaError::ContentSize {
                    path: path.clone(),
                    expected: *expected,
                    actual: found.len(),
                });
            }
        }
    }

    let files = if info.is_single_file() {
        FileSet::from_path(&root)?
    } else {
        FileSet::from_files(&root, entries.into_iter().map(|(p, _)| p).collect())?
    };

    let piece_length = usize::try_from(info.piece_length)
        .map_err(|_| MetaError::invalid("piece length", "too large for this platform"))?;
    let options = options
        .with_piece_length(piece_length)
        .with_algorithm(DigestAlgorithm::Sha1);

    info!(
        "Verifying {} ({} pieces) against {}...",
        info.name,
        info.piece_count(),
        root.display()
    );
    let digests = hash_files(&files, &options, pool)?;

    let mismatched: Vec<usize> = digests
        .chunks_exact(PIECE_HASH_SIZE)
        .zip(info.pieces.chunks_exact(PIECE_HASH_SIZE))
        .enumerate()
        .filter(|(_, (actual, expected))| actual != expected)
        .map(|(index, _)| index)
        .collect();

    let report = VerifyReport {
        pieces: info.piece_count(),
        total_length: files.total_len(),
        mismatched,
    };
    if report.is_complete() {
        info!("All {} pieces of {} verified.", report.pieces, info.name);
    } else {
        warn!(
            "{} of {} pieces of {} failed verification",
            report.mismatched.len(),
            report.pieces,
            info.name
        );
    }
    Ok(report)
}

/// Accept either the content itself or its parent directory
fn resolve_root(meta: &Metainfo, content_root: &Path) -> PathBuf {
    let named = content_root.join(&meta.info.name);
    let points_at_parent = if meta.info.is_single_file() {
        content_root.is_dir()
    } else {
        content_root.file_name().is_none_or(|n| n != meta.info.name.as_str()) && named.is_dir()
    };
    if points_at_parent {
        named
    } else {
        content_root.to_path_buf()
    }
}
