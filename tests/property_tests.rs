//! Property-based tests for Piecework
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Pipeline Properties
// ============================================================================

mod pipeline_properties {
    use super::*;
    use piecework_files::{
        ChunkSlicer, DigestAlgorithm, FileSet, HashOptions, PoolConfig, WorkerPool, hash_files,
        piece_count,
    };
    use piecework_integration_tests::{Fixture, reference_digests};

    fn fixture(sizes: &[usize], seed: u64) -> Fixture {
        sizes
            .iter()
            .enumerate()
            .fold(Fixture::new("content"), |fixture, (i, &len)| {
                fixture.random_file(&format!("{i:02}"), len, seed + i as u64)
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Parallel output equals the serial digest of the concatenation
        #[test]
        fn digests_match_serial_reference(
            sizes in prop::collection::vec(0usize..3000, 1..6),
            piece_length in 1usize..2048,
            workers in 1usize..5,
            seed in any::<u64>(),
        ) {
            prop_assume!(sizes.iter().sum::<usize>() > 0);
            let fixture = fixture(&sizes, seed);
            let files = FileSet::from_path(fixture.root()).unwrap();
            let pool = WorkerPool::new(PoolConfig::with_workers(workers));

            let options = HashOptions::default().with_piece_length(piece_length);
            let digests = hash_files(&files, &options, &pool).unwrap();

            prop_assert_eq!(
                digests,
                reference_digests(&fixture.concat(), piece_length, DigestAlgorithm::Sha1)
            );
        }

        /// Slicer emits exactly ⌈total / piece_length⌉ chunks, in index order,
        /// all full-length except possibly the last
        #[test]
        fn slicer_covers_content_once(
            sizes in prop::collection::vec(0usize..2000, 1..5),
            piece_length in 1usize..700,
        ) {
            let total: usize = sizes.iter().sum();
            prop_assume!(total > 0);
            let fixture = fixture(&sizes, 1);
            let files = FileSet::from_path(fixture.root()).unwrap();

            let chunks: Vec<_> = ChunkSlicer::new(&files, piece_length)
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            let expected = piece_count(total as u64, piece_length).unwrap() as usize;

            prop_assert_eq!(chunks.len(), expected);
            let mut covered = 0;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index().get(), i);
                if i + 1 < expected {
                    prop_assert_eq!(chunk.len(), piece_length);
                }
                covered += chunk.len();
            }
            prop_assert_eq!(covered, total);
        }
    }

    proptest! {
        #[test]
        fn piece_count_is_ceiling(total in 0u64..1 << 40, piece_length in 1usize..1 << 24) {
            let count = piece_count(total, piece_length).unwrap();
            let piece_length = piece_length as u64;
            prop_assert!(count * piece_length >= total);
            prop_assert!(count == 0 || (count - 1) * piece_length < total);
        }
    }
}

// ============================================================================
// Bencode Properties
// ============================================================================

mod bencode_properties {
    use super::*;
    use piecework_meta::{Metainfo, Value, bencode};

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(Value::Int),
            prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::List),
                prop::collection::btree_map(prop::collection::vec(any::<u8>(), 0..8), inner, 0..8)
                    .prop_map(Value::Dict),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(value in value_strategy()) {
            let encoded = value.encode();
            prop_assert_eq!(bencode::decode(&encoded).unwrap(), value);
        }

        /// Anything the decoder accepts is canonical: re-encoding it
        /// reproduces the input exactly
        #[test]
        fn accepted_input_is_canonical(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            if let Ok(value) = bencode::decode(&bytes) {
                prop_assert_eq!(value.encode(), bytes);
            }
        }

        #[test]
        fn metainfo_parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = Metainfo::from_bytes(&bytes);
        }
    }
}
