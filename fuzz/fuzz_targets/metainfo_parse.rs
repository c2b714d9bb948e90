//! Fuzz target for torrent metainfo parsing
//!
//! Tests that arbitrary `.torrent` bytes are rejected with an error rather
//! than a panic, and that accepted manifests survive a write/read cycle.

#![no_main]

use libfuzzer_sys::fuzz_target;
use piecework_meta::Metainfo;

fuzz_target!(|data: &[u8]| {
    let Ok(meta) = Metainfo::from_bytes(data) else {
        return;
    };

    // Accessors index into the piece record
    for piece in 0..meta.piece_count() {
        assert!(meta.info.piece_hash(piece).is_some());
    }
    let _ = meta.info.total_length();
    let _ = meta.info_hash();

    let reparsed = Metainfo::from_bytes(&meta.to_bytes()).expect("re-encoded manifest parses");
    assert_eq!(reparsed, meta);
});
