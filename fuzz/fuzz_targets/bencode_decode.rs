//! Fuzz target for the bencode decoder
//!
//! The decoder must never panic, and anything it accepts must re-encode to
//! the exact input bytes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use piecework_meta::bencode;

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = bencode::decode(data) {
        assert_eq!(value.encode(), data);
    }
});
