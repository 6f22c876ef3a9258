//! Property-based roundtrip tests for the data path layers
//!
//! Each layer of the pipeline (split, compress, encrypt) must restore
//! arbitrary input byte-for-byte, for every ratio and fragment shape.

use proptest::prelude::*;
use std::io::Cursor;
use wincloud_core::compression::{compress_stream, decompress_to_vec, CompressionId};
use wincloud_core::encryption::{decrypt_fragment, encrypt_fragment, MasterKey};
use wincloud_core::split::{merge, split, SplitRatio};

/// Arbitrary payloads up to 64 KiB, biased toward compressible runs.
fn arb_data() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..65536),
        (0u8..=255, 1usize..65536).prop_map(|(byte, len)| vec![byte; len]),
    ]
}

proptest! {
    #[test]
    fn split_then_merge_is_identity(data in arb_data(), percent in 0u8..=100) {
        let ratio = SplitRatio::new(percent).unwrap();
        let (local, cloud) = split(&data, ratio, 0);
        prop_assert_eq!(local.len() + cloud.len(), data.len());
        prop_assert_eq!(merge(local, cloud), data);
    }

    #[test]
    fn split_point_never_exceeds_length(len in 0u64..=u64::MAX, percent in 0u8..=100) {
        let ratio = SplitRatio::new(percent).unwrap();
        prop_assert!(ratio.split_point(len) <= len);
    }

    #[test]
    fn small_streams_stay_fully_local(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let ratio = SplitRatio::new(10).unwrap();
        let (local, cloud) = split(&data, ratio, 4096);
        prop_assert_eq!(local, &data[..]);
        prop_assert!(cloud.is_empty());
    }

    #[test]
    fn compress_then_decompress_is_identity(data in arb_data()) {
        let id = CompressionId::Lz4Zstd;
        let compressed = compress_stream(&mut Cursor::new(&data), id).unwrap();
        let restored = decompress_to_vec(&compressed, id, data.len() as u64).unwrap();
        prop_assert_eq!(restored, data);
    }

    #[test]
    fn encrypt_then_decrypt_is_identity(data in arb_data(), key_byte in any::<u8>()) {
        let key = MasterKey::from_bytes([key_byte; 32]);
        let sealed = encrypt_fragment(&key, &data).unwrap();
        // nonce + tag overhead, and never the plaintext itself
        prop_assert_eq!(sealed.len(), data.len() + 28);
        prop_assert_eq!(decrypt_fragment(&key, &sealed).unwrap(), data);
    }

    #[test]
    fn ciphertext_never_decrypts_under_another_key(data in prop::collection::vec(any::<u8>(), 1..1024)) {
        let key = MasterKey::from_bytes([1u8; 32]);
        let other = MasterKey::from_bytes([2u8; 32]);
        let sealed = encrypt_fragment(&key, &data).unwrap();
        prop_assert!(decrypt_fragment(&other, &sealed).is_err());
    }
}
