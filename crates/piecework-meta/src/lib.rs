//! # Piecework Meta
//!
//! Torrent metainfo built on the Piecework hashing engine.
//!
//! This crate provides:
//! - A canonical bencode encoder and strict decoder
//! - A typed `.torrent` manifest with info-hash computation
//! - Torrent creation from a file or directory
//! - Content verification against an existing manifest
//!
//! ## Example
//!
//! ```no_run
//! use piecework_meta::{Metainfo, TorrentCreator, verify_content};
//! use piecework_files::{PoolConfig, WorkerPool};
//! use std::path::Path;
//!
//! let pool = WorkerPool::new(PoolConfig::from_env());
//! let meta = TorrentCreator::new("/srv/share/album")
//!     .pool(pool.clone())
//!     .create()?;
//! meta.write_to("album.torrent")?;
//!
//! let parsed = Metainfo::read_from("album.torrent")?;
//! let report = verify_content(&parsed, Path::new("/srv/share/album"), &pool)?;
//! assert!(report.is_complete());
//! # Ok::<(), piecework_meta::MetaError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bencode;
pub mod creator;
pub mod error;
pub mod metainfo;
pub mod verify;

pub use bencode::{DecodeError, Value};
pub use creator::{TorrentCreator, default_created_by};
pub use error::{MetaError, Result};
pub use metainfo::{FileEntry, FileLayout, InfoDict, Metainfo};
pub use verify::{VerifyReport, verify_content, verify_content_with};
