//! Typed torrent manifest.
//!
//! [`Metainfo`] maps one-to-one onto the bencoded `.torrent` dictionary.
//! Parsing validates structure as well as types: piece digests must cover
//! exactly the content length, and file paths must be plain relative
//! components so they cannot escape the content root.

use crate::bencode::{self, Value};
use crate::error::{MetaError, Result};
use piecework_files::{PIECE_HASH_SIZE, piece_count};
use sha1::{Digest, Sha1};
use std::fs;
use std::path::{Path, PathBuf};

/// One file of a multi-file manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Length in bytes
    pub length: u64,
    /// Path components relative to the content root
    pub path: Vec<String>,
}

/// How the content maps onto files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLayout {
    /// The content is one file named after the torrent
    Single {
        /// Length in bytes
        length: u64,
    },
    /// The content is a directory named after the torrent
    Multi {
        /// Files in hashing order
        files: Vec<FileEntry>,
    },
}

/// The `info` dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoDict {
    /// Suggested file or directory name
    pub name: String,
    /// Piece length in bytes
    pub piece_length: u64,
    /// Concatenated 20-byte SHA-1 piece digests
    pub pieces: Vec<u8>,
    /// File layout
    pub layout: FileLayout,
}

/// A parsed or freshly created `.torrent` manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metainfo {
    /// Primary tracker, present when exactly one tracker is known
    pub announce: Option<String>,
    /// Tracker tiers
    pub announce_list: Vec<Vec<String>>,
    /// Creation time in seconds since the Unix epoch
    pub creation_date: Option<i64>,
    /// Creating program
    pub created_by: Option<String>,
    /// The hashed content description
    pub info: InfoDict,
}

impl InfoDict {
    /// Number of pieces
    #[must_use]
    pub fn piece_count(&self) -> usize {
        self.pieces.len() / PIECE_HASH_SIZE
    }

    /// Digest of piece `index`
    #[must_use]
    pub fn piece_hash(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(PIECE_HASH_SIZE)?;
        self.pieces.get(start..start.checked_add(PIECE_HASH_SIZE)?)
    }

    /// Total content length
    #[must_use]
    pub fn total_length(&self) -> u64 {
        match &self.layout {
            FileLayout::Single { length } => *length,
            FileLayout::Multi { files } => files
                .iter()
                .fold(0u64, |total, f| total.saturating_add(f.length)),
        }
    }

    /// Whether the manifest describes a single file
    #[must_use]
    pub fn is_single_file(&self) -> bool {
        matches!(self.layout, FileLayout::Single { .. })
    }

    /// Files with their on-disk paths under `root`.
    ///
    /// For a single-file manifest `root` is the file itself.
    #[must_use]
    pub fn content_paths(&self, root: &Path) -> Vec<(PathBuf, u64)> {
        match &self.layout {
            FileLayout::Single { length } => vec![(root.to_path_buf(), *length)],
            FileLayout::Multi { files } => files
                .iter()
                .map(|f| (f.path.iter().fold(root.to_path_buf(), |p, c| p.join(c)), f.length))
                .collect(),
        }
    }

    /// Bencode form
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut info = Value::dict();
        info.insert("name", Value::string(&self.name));
        info.insert("piece length", Value::Int(to_int(self.piece_length)));
        info.insert("pieces", Value::Bytes(self.pieces.clone()));
        match &self.layout {
            FileLayout::Single { length } => info.insert("length", Value::Int(to_int(*length))),
            FileLayout::Multi { files } => {
                let files = files
                    .iter()
                    .map(|f| {
                        let mut entry = Value::dict();
                        entry.insert("length", Value::Int(to_int(f.length)));
                        entry.insert(
                            "path",
                            Value::List(f.path.iter().map(Value::string).collect()),
                        );
                        entry
                    })
                    .collect();
                info.insert("files", Value::List(files));
            }
        }
        info
    }

    /// Parse and validate an `info` dictionary
    ///
    /// # Errors
    ///
    /// Returns [`MetaError`] for missing fields, wrong types, unsafe paths,
    /// or a digest count that does not match the content length.
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(MetaError::invalid("info", "not a dictionary"));
        }

        let name = required_str(value, "name")?.to_string();
        check_component("name", &name)?;

        let piece_length = required_len(value, "piece length")?;
        if piece_length == 0 {
            return Err(MetaError::invalid("piece length", "must be positive"));
        }

        let pieces = value
            .get("pieces")
            .ok_or(MetaError::MissingField("pieces"))?
            .as_bytes()
            .ok_or_else(|| MetaError::invalid("pieces", "not a byte string"))?
            .to_vec();
        if pieces.len() % PIECE_HASH_SIZE != 0 {
            return Err(MetaError::invalid(
                "pieces",
                format!("length {} is not a multiple of {PIECE_HASH_SIZE}", pieces.len()),
            ));
        }

        let layout = match (value.get("length"), value.get("files")) {
            (Some(_), Some(_)) => {
                return Err(MetaError::invalid("length", "both length and files present"));
            }
            (None, None) => return Err(MetaError::MissingField("length")),
            (Some(_), None) => FileLayout::Single {
                length: required_len(value, "length")?,
            },
            (None, Some(files)) => FileLayout::Multi {
                files: parse_files(files)?,
            },
        };

        let info = Self {
            name,
            piece_length,
            pieces,
            layout,
        };

        let total = info.total_length();
        let expected = usize::try_from(piece_length)
            .ok()
            .and_then(|len| piece_count(total, len))
            .ok_or_else(|| MetaError::invalid("piece length", "too large"))?;
        if info.piece_count() as u64 != expected {
            return Err(MetaError::invalid(
                "pieces",
                format!(
                    "{} digests for {total} bytes at piece length {piece_length}, expected {expected}",
                    info.piece_count()
                ),
            ));
        }

        Ok(info)
    }
}

impl Metainfo {
    /// Number of pieces
    #[must_use]
    pub fn piece_count(&self) -> usize {
        self.info.piece_count()
    }

    /// Total content length
    #[must_use]
    pub fn total_length(&self) -> u64 {
        self.info.total_length()
    }

    /// SHA-1 of the bencoded `info` dictionary
    #[must_use]
    pub fn info_hash(&self) -> [u8; 20] {
        Sha1::digest(self.info.to_value().encode()).into()
    }

    /// Info hash as lowercase hex
    #[must_use]
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash())
    }

    /// Every tracker, tier by tier, then the primary one if not in a tier
    #[must_use]
    pub fn trackers(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self
            .announce_list
            .iter()
            .flatten()
            .map(String::as_str)
            .collect();
        if let Some(primary) = self.announce.as_deref() {
            if !all.contains(&primary) {
                all.push(primary);
            }
        }
        all
    }

    /// Bencode form
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut root = Value::dict();
        if let Some(announce) = &self.announce {
            root.insert("announce", Value::string(announce));
        }
        if !self.announce_list.is_empty() {
            let tiers = self
                .announce_list
                .iter()
                .map(|tier| Value::List(tier.iter().map(Value::string).collect()))
                .collect();
            root.insert("announce-list", Value::List(tiers));
        }
        if let Some(date) = self.creation_date {
            root.insert("creation date", Value::Int(date));
        }
        if let Some(created_by) = &self.created_by {
            root.insert("created by", Value::string(created_by));
        }
        root.insert("info", self.info.to_value());
        root
    }

    /// Encode as a `.torrent` file body
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_value().encode()
    }

    /// Parse a `.torrent` file body
    ///
    /// # Errors
    ///
    /// Returns [`MetaError`] for malformed bencode or an invalid manifest.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let root = bencode::decode(data)?;
        if root.as_dict().is_none() {
            return Err(MetaError::invalid("root", "not a dictionary"));
        }

        let announce = optional_str(&root, "announce")?;
        let announce_list = match root.get("announce-list") {
            None => Vec::new(),
            Some(value) => parse_tiers(value)?,
        };
        let creation_date = match root.get("creation date") {
            None => None,
            Some(value) => Some(
                value
                    .as_int()
                    .ok_or_else(|| MetaError::invalid("creation date", "not an integer"))?,
            ),
        };
        let created_by = optional_str(&root, "created by")?;
        let info = InfoDict::from_value(root.get("info").ok_or(MetaError::MissingField("info"))?)?;

        Ok(Self {
            announce,
            announce_list,
            creation_date,
            created_by,
            info,
        })
    }

    /// Read and parse a `.torrent` file
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::Io`] if the file cannot be read, otherwise as
    /// [`Metainfo::from_bytes`].
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&fs::read(path)?)
    }

    /// Write the encoded manifest to `path`
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::Io`] if the file cannot be written.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

fn to_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn required_str<'a>(dict: &'a Value, field: &'static str) -> Result<&'a str> {
    dict.get(field)
        .ok_or(MetaError::MissingField(field))?
        .as_str()
        .ok_or_else(|| MetaError::invalid(field, "not a UTF-8 string"))
}

fn optional_str(dict: &Value, field: &'static str) -> Result<Option<String>> {
    match dict.get(field) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| MetaError::invalid(field, "not a UTF-8 string")),
    }
}

fn required_len(dict: &Value, field: &'static str) -> Result<u64> {
    let n = dict
        .get(field)
        .ok_or(MetaError::MissingField(field))?
        .as_int()
        .ok_or_else(|| MetaError::invalid(field, "not an integer"))?;
    u64::try_from(n).map_err(|_| MetaError::invalid(field, format!("negative value {n}")))
}

fn parse_files(value: &Value) -> Result<Vec<FileEntry>> {
    let list = value
        .as_list()
        .ok_or_else(|| MetaError::invalid("files", "not a list"))?;
    if list.is_empty() {
        return Err(MetaError::invalid("files", "empty file list"));
    }

    list.iter()
        .map(|entry| -> Result<FileEntry> {
            let length = required_len(entry, "length")?;
            let components = entry
                .get("path")
                .ok_or(MetaError::MissingField("path"))?
                .as_list()
                .ok_or_else(|| MetaError::invalid("path", "not a list"))?;
            if components.is_empty() {
                return Err(MetaError::invalid("path", "empty path"));
            }
            let path = components
                .iter()
                .map(|c| -> Result<String> {
                    let c = c
                        .as_str()
                        .ok_or_else(|| MetaError::invalid("path", "not a UTF-8 string"))?;
                    check_component("path", c)?;
                    Ok(c.to_string())
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(FileEntry { length, path })
        })
        .collect()
}

fn parse_tiers(value: &Value) -> Result<Vec<Vec<String>>> {
    let tiers = value
        .as_list()
        .ok_or_else(|| MetaError::invalid("announce-list", "not a list"))?;
    tiers
        .iter()
        .map(|tier| -> Result<Vec<String>> {
            tier.as_list()
                .ok_or_else(|| MetaError::invalid("announce-list", "tier is not a list"))?
                .iter()
                .map(|url| {
                    url.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| MetaError::invalid("announce-list", "not a UTF-8 string"))
                })
                .collect()
        })
        .collect()
}

/// Reject names that would not stay inside the content root
fn check_component(field: &'static str, component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\', '\0'])
    {
        return Err(MetaError::invalid(
            field,
            format!("unsafe path component {component:?}"),
        ));
    }
    Ok(())
}
