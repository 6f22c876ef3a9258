//! End-to-end archive pipeline integration tests
//!
//! Drives the full compress → split → encrypt → upload → write path and
//! back through download → decrypt → merge → decompress → verify,
//! against the in-memory cloud store.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use wincloud_core::cloud::{CloudStore, MemoryCloudStore, NullCloudStore};
use wincloud_core::config::Config;
use wincloud_core::container;
use wincloud_core::encryption::MasterKey;
use wincloud_core::error::ArchiveError;
use wincloud_core::keystore::StaticKeyProvider;
use wincloud_core::pipeline::{ArchiveEngine, VerifyPolicy};
use wincloud_core::split::SplitRatio;

fn test_config() -> Config {
    let mut config = Config::default();
    config.split = SplitRatio::new(10).unwrap();
    // force even tiny test files through the split path
    config.keep_local_below = 0;
    config
}

fn keys() -> Arc<StaticKeyProvider> {
    Arc::new(StaticKeyProvider(MasterKey::from_bytes([7u8; 32])))
}

fn write_inputs(dir: &TempDir, files: &[(&str, &[u8])]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(name, data)| {
            let path = dir.path().join(name);
            fs::write(&path, data).unwrap();
            path
        })
        .collect()
}

#[tokio::test]
async fn test_create_then_extract_restores_every_byte() {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(
        &dir,
        &[
            ("a.txt", b"the quick brown fox jumps over the lazy dog".as_ref()),
            ("b.bin", &[0xA5u8; 200_000]),
            ("empty.dat", b"".as_ref()),
        ],
    );
    let store = Arc::new(MemoryCloudStore::new());
    let engine = ArchiveEngine::new(test_config(), keys(), store.clone());

    let out = dir.path().join("backup.wca");
    let summary = engine.create_archive(&inputs, &out).await.unwrap();
    assert!(summary.cloud_archive_id.is_some());
    assert!(summary.upload_error.is_none());
    assert!(summary.skipped.is_empty());

    let restore = dir.path().join("restore");
    let report = engine
        .extract_archive(&out, &restore, VerifyPolicy::FailFast)
        .await
        .unwrap();
    assert_eq!(report.written.len(), 3);
    assert!(report.failed.is_empty());

    assert_eq!(
        fs::read(restore.join("a.txt")).unwrap(),
        b"the quick brown fox jumps over the lazy dog"
    );
    assert_eq!(fs::read(restore.join("b.bin")).unwrap(), vec![0xA5u8; 200_000]);
    assert_eq!(fs::read(restore.join("empty.dat")).unwrap(), b"");
}

#[tokio::test]
async fn test_local_fragment_honors_ten_percent_split() {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(&dir, &[("big.bin", &[0x5Au8; 1_000_000])]);
    let store = Arc::new(MemoryCloudStore::new());
    let engine = ArchiveEngine::new(test_config(), keys(), store);

    let out = dir.path().join("big.wca");
    engine.create_archive(&inputs, &out).await.unwrap();

    let archive = container::read_archive(&out).unwrap();
    let record = &archive.meta.files[0];
    // floor(compressed * 10 / 100) stays local, the rest goes to the cloud
    assert_eq!(record.local_size, record.compressed_size * 10 / 100);
    assert_eq!(record.local_size + record.cloud_size, record.compressed_size);
    assert_eq!(archive.local_data.len() as u64, record.local_size);
}

#[tokio::test]
async fn test_two_file_split_arithmetic_sums_per_file_floors() {
    let dir = TempDir::new().unwrap();
    // incompressible inputs keep compressed sizes close to the originals
    let first: Vec<u8> = (0..1_000_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
    let second: Vec<u8> = (0..500_000u32).map(|i| (i.wrapping_mul(40_503) >> 7) as u8).collect();
    let inputs = write_inputs(&dir, &[("first.bin", first.as_ref()), ("second.bin", second.as_ref())]);
    let store = Arc::new(MemoryCloudStore::new());
    let engine = ArchiveEngine::new(test_config(), keys(), store);

    let out = dir.path().join("pair.wca");
    engine.create_archive(&inputs, &out).await.unwrap();

    let archive = container::read_archive(&out).unwrap();
    assert_eq!(archive.meta.files.len(), 2);
    let mut local_total = 0u64;
    for record in &archive.meta.files {
        assert_eq!(record.local_size, record.compressed_size * 10 / 100);
        assert_eq!(record.local_size + record.cloud_size, record.compressed_size);
        local_total += record.local_size;
    }
    assert_eq!(archive.local_data.len() as u64, local_total);
}

#[tokio::test]
async fn test_stored_cloud_fragment_is_not_plaintext() {
    let dir = TempDir::new().unwrap();
    let needle = b"CONFIDENTIAL-PAYROLL-RECORDS".repeat(2000);
    let inputs = write_inputs(&dir, &[("secret.txt", needle.as_ref())]);
    let store = Arc::new(MemoryCloudStore::new());
    let engine = ArchiveEngine::new(test_config(), keys(), store.clone());

    let out = dir.path().join("secret.wca");
    let summary = engine.create_archive(&inputs, &out).await.unwrap();
    let id = summary.cloud_archive_id.unwrap();

    let sealed = store.fragment(&id).unwrap();
    assert!(!sealed.is_empty());
    // neither the plaintext marker nor the codec's own framing leaks through
    assert!(!sealed
        .windows(12)
        .any(|w| w == &b"CONFIDENTIAL"[..]));
}

#[tokio::test]
async fn test_upload_failure_degrades_to_local_only() {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(&dir, &[("data.bin", &[0x11u8; 500_000])]);
    let engine = ArchiveEngine::new(test_config(), keys(), Arc::new(NullCloudStore));

    let out = dir.path().join("offline.wca");
    let summary = engine.create_archive(&inputs, &out).await.unwrap();
    assert!(summary.cloud_archive_id.is_none());
    assert!(summary.upload_error.is_some());

    // the degraded archive is self-contained: extraction needs no network
    let archive = container::read_archive(&out).unwrap();
    assert_eq!(archive.meta.files[0].cloud_size, 0);

    let restore = dir.path().join("restore");
    let report = engine
        .extract_archive(&out, &restore, VerifyPolicy::FailFast)
        .await
        .unwrap();
    assert_eq!(report.written.len(), 1);
    assert_eq!(fs::read(restore.join("data.bin")).unwrap(), vec![0x11u8; 500_000]);
}

#[tokio::test]
async fn test_zero_file_archive_makes_no_network_calls() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryCloudStore::new());
    let engine = ArchiveEngine::new(test_config(), keys(), store.clone());

    let out = dir.path().join("empty.wca");
    let summary = engine.create_archive(&[], &out).await.unwrap();
    assert!(summary.cloud_archive_id.is_none());

    let restore = dir.path().join("restore");
    let report = engine
        .extract_archive(&out, &restore, VerifyPolicy::FailFast)
        .await
        .unwrap();
    assert!(report.written.is_empty());
    assert_eq!(store.upload_calls(), 0);
    assert_eq!(store.download_calls(), 0);
}

#[tokio::test]
async fn test_corrupted_checksum_best_effort_vs_fail_fast() {
    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(
        &dir,
        &[
            ("one.txt", b"first file".as_ref()),
            ("two.txt", b"second file".as_ref()),
            ("three.txt", b"third file".as_ref()),
        ],
    );
    // local-only config so the archive can be rewritten without re-upload
    let mut config = test_config();
    config.keep_local_below = u64::MAX;
    let engine = ArchiveEngine::new(config, keys(), Arc::new(MemoryCloudStore::new()));

    let out = dir.path().join("triple.wca");
    engine.create_archive(&inputs, &out).await.unwrap();

    // flip the stored digest for one record and rewrite the archive
    let mut archive = container::read_archive(&out).unwrap();
    archive.meta.files[1].checksum = "f".repeat(64);
    let mut bytes = Vec::new();
    container::write_archive(&mut bytes, &archive.meta, &archive.local_data).unwrap();
    fs::write(&out, &bytes).unwrap();

    let restore = dir.path().join("best_effort");
    let report = engine
        .extract_archive(&out, &restore, VerifyPolicy::BestEffort)
        .await
        .unwrap();
    assert_eq!(report.written.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "two.txt");
    assert!(!restore.join("two.txt").exists());

    let strict = dir.path().join("fail_fast");
    let err = engine
        .extract_archive(&out, &strict, VerifyPolicy::FailFast)
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::ChecksumMismatch { .. }));
}

#[tokio::test]
async fn test_unreadable_input_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut inputs = write_inputs(&dir, &[("good.txt", b"still archived".as_ref())]);
    inputs.push(dir.path().join("does-not-exist.txt"));
    let engine = ArchiveEngine::new(test_config(), keys(), Arc::new(MemoryCloudStore::new()));

    let out = dir.path().join("partial.wca");
    let summary = engine.create_archive(&inputs, &out).await.unwrap();
    assert_eq!(summary.skipped.len(), 1);

    let archive = container::read_archive(&out).unwrap();
    assert_eq!(archive.meta.files.len(), 1);
    assert_eq!(archive.meta.files[0].name, "good.txt");
}

#[tokio::test]
async fn test_all_inputs_unreadable_is_an_error() {
    let dir = TempDir::new().unwrap();
    let inputs = vec![dir.path().join("a.missing"), dir.path().join("b.missing")];
    let engine = ArchiveEngine::new(test_config(), keys(), Arc::new(MemoryCloudStore::new()));

    let out = dir.path().join("never.wca");
    let err = engine.create_archive(&inputs, &out).await.unwrap_err();
    assert!(matches!(err, ArchiveError::AllInputsFailed { failed: 2 }));
    assert!(!out.exists());
}

#[tokio::test]
async fn test_progress_reaches_one_hundred_percent() {
    use std::sync::atomic::{AtomicU8, Ordering};

    let dir = TempDir::new().unwrap();
    let inputs = write_inputs(&dir, &[("p.bin", &[9u8; 50_000])]);
    let max_percent = Arc::new(AtomicU8::new(0));
    let seen = Arc::clone(&max_percent);
    let engine = ArchiveEngine::new(test_config(), keys(), Arc::new(MemoryCloudStore::new()))
        .with_progress(Arc::new(move |update| {
            seen.fetch_max(update.percent, Ordering::Relaxed);
        }));

    let out = dir.path().join("progress.wca");
    engine.create_archive(&inputs, &out).await.unwrap();
    assert_eq!(max_percent.load(Ordering::Relaxed), 100);
}
