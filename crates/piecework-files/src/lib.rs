//! # Piecework Files
//!
//! Piece hashing engine for Piecework.
//!
//! This crate provides:
//! - File-set walking with deterministic ordering and up-front validation
//! - Chunk slicing over memory-mapped files, with overflow assembly for
//!   pieces that straddle file boundaries
//! - A bounded worker pool with caller-runs backpressure
//! - Ordered digest assembly into a pre-sized, disjoint-slot buffer
//!
//! ## Pipeline
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  FileSet   │──▶│ ChunkSlicer  │──▶│  WorkerPool  │──▶│ PieceAssembly│
//! │ (walker)   │   │ (producer)   │   │ (bounded q)  │   │ (slot i ← d) │
//! └────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!                         │ queue full: run on producer thread │
//!                         └────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use piecework_files::{FileSet, HashOptions, WorkerPool, PoolConfig, hash_files};
//!
//! let files = FileSet::from_path("/srv/share/album")?;
//! let pool = WorkerPool::new(PoolConfig::from_env());
//! let pieces = hash_files(&files, &HashOptions::default(), &pool)?;
//! assert_eq!(pieces.len() % 20, 0);
//! # Ok::<(), piecework_files::HashError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembly;
pub mod chunker;
pub mod config;
pub mod error;
pub mod hasher;
pub mod pipeline;
pub mod walker;
pub mod worker;

pub use assembly::{CompletionCounter, DigestBuffer, PieceAssembly};
pub use chunker::{Chunk, ChunkSlicer, PieceIndex};
pub use config::{HASHING_THREADS_ENV, PoolConfig, parse_worker_override, resolve_worker_count};
pub use error::HashError;
pub use hasher::{DigestAlgorithm, PieceHasher};
pub use pipeline::{Cancellation, HashOptions, ProgressFn, hash_files};
pub use walker::{FileDescriptor, FileSet};
pub use worker::{PoolStats, WorkerError, WorkerPool};

/// Default piece length (512 KiB).
pub const DEFAULT_PIECE_LENGTH: usize = 512 * 1024;

/// Digest width of the default piece digest (SHA-1).
pub const PIECE_HASH_SIZE: usize = 20;

/// Number of pieces needed to cover `total_len` bytes.
///
/// Returns `None` if `piece_length` is zero.
#[must_use]
pub fn piece_count(total_len: u64, piece_length: usize) -> Option<u64> {
    if piece_length == 0 {
        return None;
    }
    Some(total_len.div_ceil(piece_length as u64))
}
