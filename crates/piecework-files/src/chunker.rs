//! Chunk slicing over a file set.
//!
//! The slicer walks the files of a [`FileSet`] in order and yields one
//! [`Chunk`] per piece, in increasing piece order. Whole pieces that lie
//! inside a single file are zero-copy views into a read-only memory map.
//! Anything else (a file tail shorter than a piece, possibly joined with
//! the head of the following files) is copied into an owned overflow
//! buffer, which is handed off by move once full and replaced with a fresh
//! one.

use crate::error::HashError;
use crate::walker::{FileDescriptor, FileSet};
use memmap2::Mmap;
use std::fs::File;
use std::sync::Arc;
use tracing::{debug, info};

/// Index of a piece within a hashing run.
///
/// Minted exactly once per piece by the slicer and deliberately not
/// `Clone`: whoever holds it owns the digest slot for that piece.
#[derive(Debug, PartialEq, Eq)]
pub struct PieceIndex(usize);

impl PieceIndex {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Numeric piece index
    #[must_use]
    pub fn get(&self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub(crate) enum ChunkData {
    /// View into a single file's mapping
    Mapped {
        map: Arc<Mmap>,
        start: usize,
        end: usize,
    },
    /// Bytes assembled into an overflow buffer
    Owned(Vec<u8>),
}

impl ChunkData {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mapped { map, start, end } => &map[*start..*end],
            Self::Owned(buf) => buf,
        }
    }
}

/// Bytes of one piece, tagged with the piece index
#[derive(Debug)]
pub struct Chunk {
    index: PieceIndex,
    data: ChunkData,
}

impl Chunk {
    /// Piece this chunk belongs to
    #[must_use]
    pub fn index(&self) -> &PieceIndex {
        &self.index
    }

    /// Piece bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Chunk length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.data {
            ChunkData::Mapped { start, end, .. } => end - start,
            ChunkData::Owned(buf) => buf.len(),
        }
    }

    /// Whether the chunk is empty (never true for emitted chunks)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the chunk is a zero-copy view into a file mapping
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        matches!(self.data, ChunkData::Mapped { .. })
    }

    /// Separate slot ownership from the bytes
    pub(crate) fn into_parts(self) -> (PieceIndex, ChunkData) {
        (self.index, self.data)
    }
}

/// The file currently being sliced
struct MappedFile {
    map: Arc<Mmap>,
    cursor: usize,
}

impl MappedFile {
    fn remaining(&self) -> usize {
        self.map.len() - self.cursor
    }
}

/// Sequential producer of piece chunks.
///
/// Yields `Err` at most once, after which iteration stops.
pub struct ChunkSlicer<'a> {
    files: std::slice::Iter<'a, FileDescriptor>,
    piece_length: usize,
    current: Option<MappedFile>,
    overflow: Vec<u8>,
    produced: usize,
    done: bool,
}

impl<'a> ChunkSlicer<'a> {
    /// Create a slicer over `files` with the given piece length.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::InvalidPieceLength`] if `piece_length` is zero.
    pub fn new(files: &'a FileSet, piece_length: usize) -> Result<Self, HashError> {
        if piece_length == 0 {
            return Err(HashError::InvalidPieceLength(piece_length));
        }
        Ok(Self {
            files: files.files().iter(),
            piece_length,
            current: None,
            overflow: Vec::new(),
            produced: 0,
            done: false,
        })
    }

    /// Number of chunks emitted so far
    #[must_use]
    pub fn produced(&self) -> usize {
        self.produced
    }

    fn emit(&mut self, data: ChunkData) -> Chunk {
        let index = PieceIndex::new(self.produced);
        self.produced += 1;
        Chunk { index, data }
    }

    /// Hand the overflow buffer off and start a fresh one
    fn flush_overflow(&mut self) -> Chunk {
        let full = std::mem::take(&mut self.overflow);
        self.emit(ChunkData::Owned(full))
    }

    fn open(&self, desc: &FileDescriptor) -> Result<Option<MappedFile>, HashError> {
        let path = desc.path();
        let file = File::open(path)
            .map_err(|e| HashError::validation(path, format!("not readable: {e}")))?;
        let len = file.metadata()?.len();
        if len != desc.length() {
            return Err(HashError::validation(
                path,
                format!("length changed from {} to {len} bytes", desc.length()),
            ));
        }

        info!(
            "Hashing data from {} ({} pieces)...",
            path.display(),
            len.div_ceil(self.piece_length as u64)
        );

        if len == 0 {
            return Ok(None);
        }
        if usize::try_from(len).is_err() {
            return Err(HashError::validation(path, "too large to map"));
        }

        // SAFETY: the mapping is read-only and the file was validated as a
        // regular file. Concurrent truncation by another process is outside
        // our control; the length check above catches edits made between
        // walking and slicing.
        let map = unsafe { Mmap::map(&file)? };

        #[cfg(unix)]
        if let Err(e) = map.advise(memmap2::Advice::Sequential) {
            debug!("madvise failed for {}: {}", path.display(), e);
        }

        Ok(Some(MappedFile {
            map: Arc::new(map),
            cursor: 0,
        }))
    }
}

impl Iterator for ChunkSlicer<'_> {
    type Item = Result<Chunk, HashError>;

    fn next(&mut self) -> Option<Self::Item> {
        let piece_length = self.piece_length;

        loop {
            if self.done {
                return None;
            }

            if let Some(file) = self.current.as_mut() {
                let remaining = file.remaining();
                if remaining == 0 {
                    self.current = None;
                    continue;
                }

                // A whole piece lies inside this file and nothing is pending.
                if self.overflow.is_empty() && remaining >= piece_length {
                    let start = file.cursor;
                    file.cursor += piece_length;
                    let data = ChunkData::Mapped {
                        map: Arc::clone(&file.map),
                        start,
                        end: start + piece_length,
                    };
                    return Some(Ok(self.emit(data)));
                }

                if self.overflow.capacity() == 0 {
                    self.overflow.reserve_exact(piece_length);
                }
                let take = remaining.min(piece_length - self.overflow.len());
                let start = file.cursor;
                self.overflow
                    .extend_from_slice(&file.map[start..start + take]);
                file.cursor += take;

                if self.overflow.len() == piece_length {
                    return Some(Ok(self.flush_overflow()));
                }
                continue;
            }

            match self.files.next() {
                Some(desc) => match self.open(desc) {
                    Ok(next) => self.current = next,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                None => {
                    self.done = true;
                    // The last, necessarily shorter, piece
                    if !self.overflow.is_empty() {
                        return Some(Ok(self.flush_overflow()));
                    }
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    fn file_set(dir: &Path, files: &[(&str, Vec<u8>)]) -> FileSet {
        for (name, data) in files {
            fs::write(dir.join(name), data).unwrap();
        }
        FileSet::from_path(dir).unwrap()
    }

    fn slice_all(set: &FileSet, piece_length: usize) -> Vec<Chunk> {
        ChunkSlicer::new(set, piece_length)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_zero_piece_length_rejected() {
        let dir = TempDir::new().unwrap();
        let set = file_set(dir.path(), &[("a", pattern(10, 0))]);
        assert!(matches!(
            ChunkSlicer::new(&set, 0),
            Err(HashError::InvalidPieceLength(0))
        ));
    }

    #[test]
    fn test_single_file_exact_multiple() {
        let dir = TempDir::new().unwrap();
        let data = pattern(4096, 1);
        let set = file_set(dir.path(), &[("a", data.clone())]);

        let chunks = slice_all(&set, 1024);
        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index().get(), i);
            assert_eq!(chunk.len(), 1024);
            assert!(chunk.is_mapped());
            assert_eq!(chunk.bytes(), &data[i * 1024..(i + 1) * 1024]);
        }
    }

    #[test]
    fn test_single_file_short_tail() {
        let dir = TempDir::new().unwrap();
        let data = pattern(2500, 2);
        let set = file_set(dir.path(), &[("a", data.clone())]);

        let chunks = slice_all(&set, 1000);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].is_mapped());
        assert!(chunks[1].is_mapped());
        assert!(!chunks[2].is_mapped());
        assert_eq!(chunks[2].bytes(), &data[2000..]);
    }

    #[test]
    fn test_piece_spanning_files() {
        let dir = TempDir::new().unwrap();
        let a = pattern(300_000, 3);
        let b = pattern(400_000, 4);
        let set = file_set(dir.path(), &[("a", a.clone()), ("b", b.clone())]);

        let chunks = slice_all(&set, 500_000);
        assert_eq!(chunks.len(), 2);

        let mut first = a.clone();
        first.extend_from_slice(&b[..200_000]);
        assert_eq!(chunks[0].bytes(), first.as_slice());
        assert!(!chunks[0].is_mapped());
        assert_eq!(chunks[1].bytes(), &b[200_000..]);
    }

    #[test]
    fn test_pending_overflow_blocks_zero_copy() {
        // A short first file leaves bytes pending; the next file's head must
        // complete that piece before any direct view is taken.
        let dir = TempDir::new().unwrap();
        let a = pattern(30, 5);
        let b = pattern(200, 6);
        let set = file_set(dir.path(), &[("a", a.clone()), ("b", b.clone())]);

        let chunks = slice_all(&set, 50);
        let mut concat = a.clone();
        concat.extend_from_slice(&b);

        assert_eq!(chunks.len(), 5);
        for (i, chunk) in chunks.iter().enumerate() {
            let end = ((i + 1) * 50).min(concat.len());
            assert_eq!(chunk.bytes(), &concat[i * 50..end], "piece {i}");
        }
    }

    #[test]
    fn test_piece_spanning_many_files() {
        let dir = TempDir::new().unwrap();
        let set = file_set(
            dir.path(),
            &[
                ("a", pattern(3, 7)),
                ("b", pattern(0, 0)),
                ("c", pattern(4, 8)),
                ("d", pattern(5, 9)),
            ],
        );

        let chunks = slice_all(&set, 16);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 12);
    }

    #[test]
    fn test_zero_length_files_are_inert() {
        let dir = TempDir::new().unwrap();
        let a = pattern(100, 10);
        let set = file_set(
            dir.path(),
            &[("0", Vec::new()), ("1", a.clone()), ("2", Vec::new())],
        );

        let chunks = slice_all(&set, 64);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].bytes(), &a[..64]);
        assert_eq!(chunks[1].bytes(), &a[64..]);
    }

    #[test]
    fn test_empty_set_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let set = file_set(dir.path(), &[("a", Vec::new())]);
        let mut slicer = ChunkSlicer::new(&set, 64).unwrap();
        assert!(slicer.next().is_none());
        assert_eq!(slicer.produced(), 0);
    }

    #[test]
    fn test_length_change_detected() {
        let dir = TempDir::new().unwrap();
        let set = file_set(dir.path(), &[("a", pattern(100, 11))]);
        fs::write(dir.path().join("a"), pattern(150, 11)).unwrap();

        let mut slicer = ChunkSlicer::new(&set, 64).unwrap();
        let err = slicer.next().unwrap().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("length changed"));
        assert!(slicer.next().is_none());
    }

    #[test]
    fn test_no_byte_skipped_or_duplicated() {
        let dir = TempDir::new().unwrap();
        let files = [
            ("a", pattern(777, 12)),
            ("b", pattern(1, 13)),
            ("c", pattern(1024, 14)),
            ("d", pattern(333, 15)),
        ];
        let set = file_set(dir.path(), &files);
        let concat: Vec<u8> = files.iter().flat_map(|(_, d)| d.clone()).collect();

        for piece_length in [1, 7, 256, 1024, 4096] {
            let chunks = slice_all(&set, piece_length);
            assert_eq!(
                chunks.len() as u64,
                (concat.len() as u64).div_ceil(piece_length as u64)
            );
            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.bytes().to_vec()).collect();
            assert_eq!(joined, concat, "piece length {piece_length}");
        }
    }
}
