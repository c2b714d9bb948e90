//! File-set normalization.
//!
//! Turns a root location into an ordered list of file descriptors. A single
//! file is its own file set; a directory contributes every regular file
//! directly inside it, sorted by name. The same order is used for hashing
//! and for listing files in the manifest.

use crate::error::HashError;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// One file of a file set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    path: PathBuf,
    length: u64,
    ordinal: usize,
}

impl FileDescriptor {
    /// Path of the file on disk
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length in bytes at the time the file set was built
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Position of the file within the file set
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

/// Ordered, validated set of files hashed as one byte stream
#[derive(Debug, Clone)]
pub struct FileSet {
    root: PathBuf,
    files: Vec<FileDescriptor>,
    total_len: u64,
    single_file: bool,
}

impl FileSet {
    /// Build a file set from a file or a directory.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Validation`] if the root does not exist, or if
    /// any selected file is not a regular, readable file.
    pub fn from_path<P: AsRef<Path>>(root: P) -> Result<Self, HashError> {
        let root = root.as_ref();
        let meta = fs::metadata(root).map_err(|e| describe(root, &e))?;

        if meta.is_file() {
            return Self::build(root.to_path_buf(), vec![root.to_path_buf()], true);
        }
        if !meta.is_dir() {
            return Err(HashError::validation(root, "not a file or directory"));
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(root).map_err(|e| describe(root, &e))? {
            let entry = entry.map_err(|e| describe(root, &e))?;
            let path = entry.path();
            // Follows symlinks: a link to a regular file counts as one.
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => paths.push(path),
                Ok(_) => debug!("Skipping non-regular entry {}", path.display()),
                // Dangling symlink: nothing to select
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Skipping unresolvable entry {}", path.display());
                }
                Err(e) => return Err(describe(&path, &e)),
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        Self::build(root.to_path_buf(), paths, false)
    }

    /// Build a multi-file set from an explicit, caller-ordered file list.
    ///
    /// Every file must live under `root` so its manifest path can be
    /// derived.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::EmptyInput`] for an empty list and
    /// [`HashError::Validation`] for files outside `root` or files that are
    /// missing, not regular, or unreadable.
    pub fn from_files<P: AsRef<Path>>(root: P, files: Vec<PathBuf>) -> Result<Self, HashError> {
        let root = root.as_ref();
        if files.is_empty() {
            return Err(HashError::EmptyInput);
        }
        for path in &files {
            if path.strip_prefix(root).is_err() {
                return Err(HashError::validation(
                    path,
                    format!("not under root {}", root.display()),
                ));
            }
        }
        Self::build(root.to_path_buf(), files, false)
    }

    fn build(root: PathBuf, paths: Vec<PathBuf>, single_file: bool) -> Result<Self, HashError> {
        let mut files = Vec::with_capacity(paths.len());
        let mut total_len = 0u64;

        for (ordinal, path) in paths.into_iter().enumerate() {
            let length = validate_file(&path)?;
            total_len = total_len
                .checked_add(length)
                .ok_or_else(|| HashError::validation(&path, "total length overflows u64"))?;
            files.push(FileDescriptor {
                path,
                length,
                ordinal,
            });
        }

        Ok(Self {
            root,
            files,
            total_len,
            single_file,
        })
    }

    /// Root location (the file itself for single-file sets)
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the root location, used as the manifest name
    #[must_use]
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.to_string_lossy().into_owned())
    }

    /// Files in hashing order
    #[must_use]
    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    /// Number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the set holds no files
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of all file lengths
    #[must_use]
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Whether the set was built from a single file root
    #[must_use]
    pub fn is_single_file(&self) -> bool {
        self.single_file
    }

    /// Re-check every file right before hashing.
    ///
    /// # Errors
    ///
    /// Returns a validation error for the first file that has disappeared,
    /// become unreadable, or changed length since the set was built.
    pub fn revalidate(&self) -> Result<(), HashError> {
        for file in &self.files {
            let len = validate_file(&file.path)?;
            if len != file.length {
                return Err(HashError::validation(
                    &file.path,
                    format!("length changed from {} to {len} bytes", file.length),
                ));
            }
        }
        Ok(())
    }

    /// Path components of `file` relative to the root.
    ///
    /// Empty for a single-file set.
    #[must_use]
    pub fn relative_components(&self, file: &FileDescriptor) -> Vec<String> {
        match file.path.strip_prefix(&self.root) {
            Ok(rel) => rel
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Check that `path` is a readable regular file and return its length
fn validate_file(path: &Path) -> Result<u64, HashError> {
    let meta = fs::metadata(path).map_err(|e| describe(path, &e))?;
    if !meta.is_file() {
        return Err(HashError::validation(path, "not a regular file"));
    }
    File::open(path).map_err(|e| HashError::validation(path, format!("not readable: {e}")))?;
    Ok(meta.len())
}

fn describe(path: &Path, err: &io::Error) -> HashError {
    match err.kind() {
        io::ErrorKind::NotFound => HashError::validation(path, "does not exist"),
        io::ErrorKind::PermissionDenied => HashError::validation(path, "not readable"),
        _ => HashError::validation(path, err.to_string()),
    }
}
