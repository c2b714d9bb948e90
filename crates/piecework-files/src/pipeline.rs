//! Hashing run orchestration.
//!
//! [`hash_files`] validates the file set, sizes the digest buffer, drives
//! the slicer on the calling thread, submits every chunk to the pool, and
//! blocks until every piece is released. It returns either the complete,
//! ordered digest sequence or an error, never a partial buffer.

use crate::assembly::{PieceAssembly, WaitOutcome};
use crate::chunker::{Chunk, ChunkSlicer};
use crate::error::HashError;
use crate::hasher::{DigestAlgorithm, PieceHasher};
use crate::walker::FileSet;
use crate::worker::WorkerPool;
use crate::{DEFAULT_PIECE_LENGTH, piece_count};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How often a blocked orchestrator re-checks cancellation
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Progress callback, invoked with the byte length of each hashed piece.
/// Runs on worker threads.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Shared stop flag for a hashing run
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// Create an unset flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the run stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Options for one hashing run
#[derive(Clone)]
pub struct HashOptions {
    /// Piece length in bytes
    pub piece_length: usize,
    /// Piece digest
    pub hasher: Arc<dyn PieceHasher>,
    /// Bound on the completion wait
    pub timeout: Option<Duration>,
    /// Stop flag checked by the slicer and the completion wait
    pub cancel: Cancellation,
    /// Per-piece progress callback
    pub progress: Option<ProgressFn>,
}

impl Default for HashOptions {
    fn default() -> Self {
        Self {
            piece_length: DEFAULT_PIECE_LENGTH,
            hasher: Arc::new(DigestAlgorithm::Sha1),
            timeout: None,
            cancel: Cancellation::new(),
            progress: None,
        }
    }
}

impl HashOptions {
    /// Set the piece length
    #[must_use]
    pub fn with_piece_length(mut self, piece_length: usize) -> Self {
        self.piece_length = piece_length;
        self
    }

    /// Use a built-in digest algorithm
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.hasher = Arc::new(algorithm);
        self
    }

    /// Use a custom piece hasher
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn PieceHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Bound the completion wait
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Share a stop flag with the caller
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report per-piece progress
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for HashOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashOptions")
            .field("piece_length", &self.piece_length)
            .field("digest_size", &self.hasher.digest_size())
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Hash every piece of `files` and return the concatenated digests in
/// piece order.
///
/// The result is `piece_count × digest_size` bytes, where digest `i` covers
/// bytes `[i × L, min((i + 1) × L, total))` of the files concatenated in
/// file-set order.
///
/// # Errors
///
/// - Validation errors (`InvalidPieceLength`, `EmptyInput`,
///   `TooManyPieces`) before any work is scheduled
/// - `Validation`/`Io` if a file cannot be mapped while slicing
/// - `PieceFailed` if any piece digest failed
/// - `Cancelled` or `Timeout` if the run was interrupted
/// - `PieceCountMismatch` if the slicer disagreed with the precomputed
///   piece count
pub fn hash_files(
    files: &FileSet,
    options: &HashOptions,
    pool: &WorkerPool,
) -> Result<Vec<u8>, HashError> {
    let piece_length = options.piece_length;
    let total_len = files.total_len();
    let digest_size = options.hasher.digest_size();

    let expected = piece_count(total_len, piece_length)
        .ok_or(HashError::InvalidPieceLength(piece_length))?;
    if total_len == 0 {
        return Err(HashError::EmptyInput);
    }
    let pieces = usize::try_from(expected)
        .ok()
        .filter(|p| p.checked_mul(digest_size).is_some())
        .ok_or(HashError::TooManyPieces(expected))?;

    files.revalidate()?;
    if options.cancel.is_cancelled() {
        return Err(HashError::Cancelled);
    }

    info!(
        "Hashing {} file(s) from {} ({} bytes, {} pieces of {} bytes)...",
        files.len(),
        files.root().display(),
        total_len,
        pieces,
        piece_length
    );
    let started = Instant::now();

    let assembly = Arc::new(PieceAssembly::new(pieces, digest_size));
    let mut produced = 0u64;

    for next in ChunkSlicer::new(files, piece_length)? {
        if options.cancel.is_cancelled() {
            warn!("Hashing cancelled after {} of {} pieces", produced, pieces);
            return Err(HashError::Cancelled);
        }
        if let Some(err) = assembly.failure() {
            return Err(err);
        }

        let chunk = next?;
        produced += 1;
        if chunk.index().get() >= pieces {
            // Leave it unsubmitted: there is no slot for it.
            break;
        }
        submit(pool, &assembly, options, chunk);
    }

    if produced < expected {
        assembly.forfeit((expected - produced) as usize);
    }

    let deadline = options.timeout.map(|t| Instant::now() + t);
    let outcome = assembly.counter().wait(deadline, WAIT_POLL, || {
        options.cancel.is_cancelled() || assembly.has_failed()
    });

    match outcome {
        WaitOutcome::Completed => {}
        WaitOutcome::TimedOut(outstanding) => {
            warn!("Hashing timed out with {} pieces outstanding", outstanding);
            return Err(HashError::Timeout { outstanding });
        }
        WaitOutcome::Stopped(outstanding) => {
            if let Some(err) = assembly.failure() {
                return Err(err);
            }
            warn!("Hashing cancelled with {} pieces outstanding", outstanding);
            return Err(HashError::Cancelled);
        }
    }

    let digests = assembly.finish(produced)?;

    info!(
        "Hashed {} file(s) ({} bytes) in {} pieces ({} expected) in {:.2?}.",
        files.len(),
        total_len,
        produced,
        expected,
        started.elapsed()
    );

    Ok(digests)
}

/// Hand one chunk to the pool.
///
/// The release guard is taken before the job is queued, so a job that is
/// dropped without running still releases its piece.
fn submit(pool: &WorkerPool, assembly: &Arc<PieceAssembly>, options: &HashOptions, chunk: Chunk) {
    let len = chunk.len() as u64;
    let (index, data) = chunk.into_parts();
    let guard = assembly.guard(index);
    let hasher = Arc::clone(&options.hasher);
    let progress = options.progress.clone();
    let cancel = options.cancel.clone();
    let stopped = Arc::clone(assembly);

    pool.execute(move || {
        if cancel.is_cancelled() || stopped.has_failed() {
            guard.abandon();
            return;
        }
        let hashed = guard.complete(|slot| hasher.hash_piece(data.as_slice(), slot));
        drop(data);
        if hashed.is_ok() {
            if let Some(progress) = progress {
                progress(len);
            }
        }
    });
}
