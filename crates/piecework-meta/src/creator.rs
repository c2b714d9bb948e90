//! Torrent creation.
//!
//! [`TorrentCreator`] hashes a file set with SHA-1 and wraps the digests in
//! a [`Metainfo`]. The manifest lists files in exactly the order they were
//! hashed, which is what lets a client reconstruct piece boundaries.

use crate::error::{MetaError, Result};
use crate::metainfo::{FileEntry, FileLayout, InfoDict, Metainfo};
use piecework_files::{
    Cancellation, DEFAULT_PIECE_LENGTH, DigestAlgorithm, FileSet, HashOptions, PoolConfig,
    ProgressFn, WorkerPool, hash_files,
};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;
use url::Url;

/// Tracker URL schemes accepted in announce lists
const TRACKER_SCHEMES: [&str; 4] = ["http", "https", "udp", "wss"];

/// Default `created by` value
#[must_use]
pub fn default_created_by() -> String {
    format!("piecework/{}", env!("CARGO_PKG_VERSION"))
}

/// Builder for a new torrent manifest.
///
/// ```no_run
/// use piecework_meta::TorrentCreator;
///
/// let meta = TorrentCreator::new("/srv/share/album")
///     .piece_length(256 * 1024)
///     .announce("http://tracker.example/announce")?
///     .create()?;
/// meta.write_to("album.torrent")?;
/// # Ok::<(), piecework_meta::MetaError>(())
/// ```
pub struct TorrentCreator {
    root: PathBuf,
    files: Option<Vec<PathBuf>>,
    piece_length: usize,
    tiers: Vec<Vec<Url>>,
    created_by: String,
    creation_date: Option<i64>,
    pool: Option<WorkerPool>,
    cancel: Cancellation,
    progress: Option<ProgressFn>,
    timeout: Option<Duration>,
}

impl TorrentCreator {
    /// Start a torrent for `root`, a file or a directory. The final path
    /// component becomes the torrent name.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: None,
            piece_length: DEFAULT_PIECE_LENGTH,
            tiers: Vec::new(),
            created_by: default_created_by(),
            creation_date: None,
            pool: None,
            cancel: Cancellation::new(),
            progress: None,
            timeout: None,
        }
    }

    /// Hash exactly these files, in this order, instead of walking the root
    #[must_use]
    pub fn files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = Some(files);
        self
    }

    /// Piece length in bytes
    #[must_use]
    pub fn piece_length(mut self, piece_length: usize) -> Self {
        self.piece_length = piece_length;
        self
    }

    /// Add a tracker as its own tier
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::InvalidTracker`] for an unparsable URL or an
    /// unsupported scheme.
    pub fn announce(mut self, url: &str) -> Result<Self> {
        let url = parse_tracker(url)?;
        self.tiers.push(vec![url]);
        Ok(self)
    }

    /// Replace all tiers. Each inner list is one tier.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::InvalidTracker`] for the first unusable URL.
    pub fn announce_tiers<S: AsRef<str>>(mut self, tiers: &[Vec<S>]) -> Result<Self> {
        self.tiers = tiers
            .iter()
            .map(|tier| {
                tier.iter()
                    .map(|u| parse_tracker(u.as_ref()))
                    .collect::<Result<Vec<Url>>>()
            })
            .collect::<Result<_>>()?;
        Ok(self)
    }

    /// Creating program recorded in the manifest
    #[must_use]
    pub fn created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }

    /// Pin the creation date instead of using the current time
    #[must_use]
    pub fn creation_date(mut self, secs: i64) -> Self {
        self.creation_date = Some(secs);
        self
    }

    /// Hash on a shared pool instead of one sized from the environment
    #[must_use]
    pub fn pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Share a stop flag with the caller
    #[must_use]
    pub fn cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report hashed bytes as pieces complete
    #[must_use]
    pub fn progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Bound the wait for outstanding pieces
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate the inputs, hash them, and build the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::Hash`] for any validation or hashing failure.
    pub fn create(&self) -> Result<Metainfo> {
        let files = match &self.files {
            Some(files) => FileSet::from_files(&self.root, files.clone())?,
            None => FileSet::from_path(&self.root)?,
        };
        let name = files.name();

        if files.is_single_file() {
            info!("Creating single-file torrent for {}...", name);
        } else {
            info!("Creating {}-file torrent {}...", files.len(), name);
        }

        let mut options = HashOptions::default()
            .with_piece_length(self.piece_length)
            .with_algorithm(DigestAlgorithm::Sha1)
            .with_cancellation(self.cancel.clone());
        if let Some(progress) = &self.progress {
            options = options.with_progress(progress.clone());
        }
        if let Some(timeout) = self.timeout {
            options = options.with_timeout(timeout);
        }

        let pool = self
            .pool
            .clone()
            .unwrap_or_else(|| WorkerPool::new(PoolConfig::from_env()));
        let pieces = hash_files(&files, &options, &pool)?;

        let layout = if files.is_single_file() {
            FileLayout::Single {
                length: files.total_len(),
            }
        } else {
            FileLayout::Multi {
                files: files
                    .files()
                    .iter()
                    .map(|f| FileEntry {
                        length: f.length(),
                        path: files.relative_components(f),
                    })
                    .collect(),
            }
        };

        let (announce, announce_list) = self.announce_fields();
        let meta = Metainfo {
            announce,
            announce_list,
            creation_date: Some(self.creation_date.unwrap_or_else(now_secs)),
            created_by: Some(self.created_by.clone()),
            info: InfoDict {
                name,
                piece_length: self.piece_length as u64,
                pieces,
                layout,
            },
        };

        info!(
            "Created torrent {} ({} pieces, info hash {}).",
            meta.info.name,
            meta.piece_count(),
            meta.info_hash_hex()
        );
        Ok(meta)
    }

    /// `announce` is set only when exactly one tracker is known; every
    /// non-empty tier goes into `announce-list`.
    fn announce_fields(&self) -> (Option<String>, Vec<Vec<String>>) {
        let flat: Vec<&Url> = self.tiers.iter().flatten().collect();
        let announce = match flat.as_slice() {
            [only] => Some(only.to_string()),
            _ => None,
        };
        let tiers = self
            .tiers
            .iter()
            .filter(|tier| !tier.is_empty())
            .map(|tier| tier.iter().map(Url::to_string).collect())
            .collect();
        (announce, tiers)
    }
}

fn parse_tracker(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| MetaError::InvalidTracker {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !TRACKER_SCHEMES.contains(&url.scheme()) {
        return Err(MetaError::InvalidTracker {
            url: raw.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    Ok(url)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use piecework_files::HashError;
    use std::fs;
    use tempfile::TempDir;

    fn pool() -> WorkerPool {
        WorkerPool::new(PoolConfig::with_workers(2))
    }

    #[test]
    fn test_single_file_torrent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("movie.mkv");
        fs::write(&path, vec![7u8; 100_000]).unwrap();

        let meta = TorrentCreator::new(&path)
            .piece_length(32 * 1024)
            .creation_date(1_700_000_000)
            .pool(pool())
            .create()
            .unwrap();

        assert_eq!(meta.info.name, "movie.mkv");
        assert_eq!(meta.info.layout, FileLayout::Single { length: 100_000 });
        assert_eq!(meta.piece_count(), 4);
        assert_eq!(meta.creation_date, Some(1_700_000_000));
        assert_eq!(meta.created_by, Some(default_created_by()));
        assert!(meta.announce.is_none());
        assert!(meta.announce_list.is_empty());

        let first = DigestAlgorithm::Sha1.digest(&vec![7u8; 32 * 1024]);
        assert_eq!(meta.info.piece_hash(0).unwrap(), first.as_slice());
    }

    #[test]
    fn test_directory_torrent_lists_files_in_hash_order() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("album");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("02.flac"), vec![2u8; 300]).unwrap();
        fs::write(root.join("01.flac"), vec![1u8; 500]).unwrap();

        let meta = TorrentCreator::new(&root)
            .piece_length(256)
            .pool(pool())
            .create()
            .unwrap();

        assert_eq!(meta.info.name, "album");
        let FileLayout::Multi { files } = &meta.info.layout else {
            panic!("expected multi-file layout");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, vec!["01.flac"]);
        assert_eq!(files[0].length, 500);
        assert_eq!(files[1].path, vec!["02.flac"]);
        assert_eq!(meta.piece_count(), 4);
        assert!(meta.creation_date.is_some());

        // Second piece straddles the two files
        let straddle = [vec![1u8; 244], vec![2u8; 12]].concat();
        assert_eq!(
            meta.info.piece_hash(1).unwrap(),
            DigestAlgorithm::Sha1.digest(&straddle)
        );
        assert_eq!(
            meta.info.piece_hash(3).unwrap(),
            DigestAlgorithm::Sha1.digest(&[2u8; 32])
        );
    }

    #[test]
    fn test_explicit_files_nested_paths() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("bundle");
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs").join("readme.txt"), b"hello").unwrap();
        fs::write(root.join("data.bin"), b"world!").unwrap();

        let meta = TorrentCreator::new(&root)
            .files(vec![root.join("docs").join("readme.txt"), root.join("data.bin")])
            .piece_length(4)
            .pool(pool())
            .create()
            .unwrap();

        let FileLayout::Multi { files } = &meta.info.layout else {
            panic!("expected multi-file layout");
        };
        assert_eq!(files[0].path, vec!["docs", "readme.txt"]);
        assert_eq!(files[1].path, vec!["data.bin"]);
        assert_eq!(meta.total_length(), 11);
        assert_eq!(meta.piece_count(), 3);
        assert_eq!(
            meta.info.piece_hash(1).unwrap(),
            DigestAlgorithm::Sha1.digest(b"owor")
        );
    }

    #[test]
    fn test_single_tracker_sets_announce() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"content").unwrap();

        let meta = TorrentCreator::new(&path)
            .announce("http://tracker.example/announce")
            .unwrap()
            .pool(pool())
            .create()
            .unwrap();
        assert_eq!(meta.announce.as_deref(), Some("http://tracker.example/announce"));
        assert_eq!(
            meta.announce_list,
            vec![vec!["http://tracker.example/announce".to_string()]]
        );
    }

    #[test]
    fn test_tiers_without_primary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, b"content").unwrap();

        let meta = TorrentCreator::new(&path)
            .announce_tiers(&[
                vec!["udp://a.example:6969", "http://b.example/announce"],
                vec![],
                vec!["https://c.example/announce"],
            ])
            .unwrap()
            .pool(pool())
            .create()
            .unwrap();
        assert!(meta.announce.is_none());
        assert_eq!(meta.announce_list.len(), 2);
        assert_eq!(meta.announce_list[0][0], "udp://a.example:6969");
    }

    #[test]
    fn test_rejects_bad_trackers() {
        assert!(matches!(
            TorrentCreator::new("x").announce("not a url"),
            Err(MetaError::InvalidTracker { .. })
        ));
        assert!(matches!(
            TorrentCreator::new("x").announce("ftp://tracker.example/"),
            Err(MetaError::InvalidTracker { .. })
        ));
    }

    #[test]
    fn test_missing_root_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let err = TorrentCreator::new(dir.path().join("absent"))
            .pool(pool())
            .create()
            .unwrap_err();
        assert!(matches!(err, MetaError::Hash(ref e) if e.is_validation()));
    }

    #[test]
    fn test_empty_content_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        fs::write(&path, b"").unwrap();

        let err = TorrentCreator::new(&path).pool(pool()).create().unwrap_err();
        assert!(matches!(err, MetaError::Hash(HashError::EmptyInput)));
    }

    #[test]
    fn test_created_torrent_parses_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, vec![3u8; 5000]).unwrap();

        let meta = TorrentCreator::new(&path)
            .piece_length(1024)
            .created_by("tests")
            .pool(pool())
            .create()
            .unwrap();
        let parsed = Metainfo::from_bytes(&meta.to_bytes()).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(parsed.info_hash(), meta.info_hash());
    }
}
