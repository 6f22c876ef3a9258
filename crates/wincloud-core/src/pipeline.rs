//! Archive creation and extraction orchestration.
//!
//! Write path: files → two-stage compress → per-file split → {local →
//! container; cloud → encrypt → upload}. Read path: container + download →
//! decrypt → per-file merge → decompress → verify → disk.
//!
//! Long-running work is cancellable between files; the archive file and
//! every extracted file are staged in a temp file and renamed into place, so
//! cancellation or failure never leaves a partial file under a final name.

use crate::cloud::CloudStore;
use crate::compression::{compress_file, decompress_to_vec, CompressionId};
use crate::config::Config;
use crate::container::{self, ArchiveMeta, FileRecord, FORMAT_VERSION};
use crate::encryption::{decrypt_fragment, encrypt_fragment};
use crate::error::{ArchiveError, Result};
use crate::keystore::KeyProvider;
use crate::split::{merge, split};
use crate::checksum;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, warn};

/// Shared cancellation flag, checked between files and between network
/// steps. Cancelling never corrupts an in-progress archive.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, un-cancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the running operation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What to do when a file's recomputed digest disagrees with its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    /// Write the good files, withhold and report the bad ones.
    #[default]
    BestEffort,
    /// Stop at the first bad file.
    FailFast,
}

/// Snapshot handed to the progress callback at file boundaries.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// 0..=100.
    pub percent: u8,
    /// Human-readable stage description.
    pub message: String,
    /// Original bytes processed so far.
    pub processed_bytes: u64,
    /// Total original bytes expected.
    pub total_bytes: u64,
}

/// Progress callback. Invoked from the worker; must not block.
pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// An input file that could not be read; the batch continued without it.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    /// Path as given.
    pub path: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Outcome of `create_archive`.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    /// Final archive location.
    pub archive_path: PathBuf,
    /// Total original bytes archived.
    pub total_size: u64,
    /// Bytes of the `.wca` file on disk.
    pub archive_size: u64,
    /// `1 - archive_size / total_size`, in percent.
    pub compression_ratio: f64,
    /// Remote handle, absent when the archive is fully local.
    pub cloud_archive_id: Option<String>,
    /// Inputs skipped with per-file errors.
    pub skipped: Vec<SkippedFile>,
    /// Why the cloud upload was abandoned, when it was.
    pub upload_error: Option<String>,
}

/// One file withheld during extraction.
#[derive(Debug, Clone)]
pub struct FileFailure {
    /// File record name.
    pub name: String,
    /// The integrity/format failure, rendered.
    pub reason: String,
}

/// Outcome of `extract_archive`.
#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    /// Files written to disk.
    pub written: Vec<PathBuf>,
    /// Files flagged and withheld (BestEffort only).
    pub failed: Vec<FileFailure>,
}

struct PreparedFile {
    name: String,
    path: String,
    original_size: u64,
    compressed_size: u64,
    checksum: String,
    local: Vec<u8>,
    cloud: Vec<u8>,
}

/// The archive engine: composition root wiring config, key provider, and
/// cloud store into the create/extract operations.
pub struct ArchiveEngine {
    config: Config,
    keys: Arc<dyn KeyProvider>,
    store: Arc<dyn CloudStore>,
    cancel: CancelFlag,
    progress: Option<ProgressFn>,
    processed: AtomicU64,
}

impl ArchiveEngine {
    /// Assemble an engine.
    pub fn new(config: Config, keys: Arc<dyn KeyProvider>, store: Arc<dyn CloudStore>) -> Self {
        Self {
            config,
            keys,
            store,
            cancel: CancelFlag::new(),
            progress: None,
            processed: AtomicU64::new(0),
        }
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Handle for cancelling from another thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ArchiveError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn report(&self, percent: u8, message: impl Into<String>, total: u64) {
        if let Some(cb) = &self.progress {
            cb(ProgressUpdate {
                percent,
                message: message.into(),
                processed_bytes: self.processed.load(Ordering::Relaxed),
                total_bytes: total,
            });
        }
    }

    /// Create a `.wca` archive from `inputs`, uploading the encrypted cloud
    /// fragment. If the upload fails after retries the archive degrades to
    /// fully local instead of failing.
    #[instrument(skip(self, inputs, out), fields(files = inputs.len()))]
    pub async fn create_archive(&self, inputs: &[PathBuf], out: &Path) -> Result<ArchiveSummary> {
        self.processed.store(0, Ordering::Relaxed);
        let compression = CompressionId::default();
        let expected_total: u64 = inputs
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        let mut prepared = Vec::with_capacity(inputs.len());
        let mut skipped = Vec::new();

        for (idx, input) in inputs.iter().enumerate() {
            self.check_cancel()?;
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| input.display().to_string());
            self.report(
                percent_of(self.processed.load(Ordering::Relaxed), expected_total, 80),
                format!("Compressing {} ({}/{})", name, idx + 1, inputs.len()),
                expected_total,
            );

            let compressed = match compress_file(input, compression) {
                Ok(c) => c,
                Err(ArchiveError::InputFile { path, reason }) => {
                    warn!(path, reason, "skipping unreadable input");
                    skipped.push(SkippedFile { path, reason });
                    continue;
                }
                Err(other) => return Err(other),
            };

            let (local, cloud) = split(
                &compressed.data,
                self.config.split,
                self.config.keep_local_below,
            );
            self.processed
                .fetch_add(compressed.original_size, Ordering::Relaxed);
            prepared.push(PreparedFile {
                name,
                path: input.display().to_string(),
                original_size: compressed.original_size,
                compressed_size: compressed.data.len() as u64,
                checksum: compressed.checksum,
                local: local.to_vec(),
                cloud: cloud.to_vec(),
            });
        }

        if prepared.is_empty() && !skipped.is_empty() {
            return Err(ArchiveError::AllInputsFailed {
                failed: skipped.len(),
            });
        }

        let total_size: u64 = prepared.iter().map(|f| f.original_size).sum();
        let cloud_len: u64 = prepared.iter().map(|f| f.cloud.len() as u64).sum();

        // Upload the encrypted cloud fragment first; the container is only
        // written once we know whether this archive is hybrid or local-only.
        let mut cloud_archive_id = None;
        let mut file_ids: Vec<String> = Vec::new();
        let mut upload_error = None;
        if cloud_len > 0 {
            self.check_cancel()?;
            self.report(80, "Uploading to cloud server", expected_total);
            let mut fragment = Vec::with_capacity(cloud_len as usize);
            for file in &prepared {
                fragment.extend_from_slice(&file.cloud);
            }
            let key = self.keys.master_key()?;
            let sealed = encrypt_fragment(&key, &fragment)?;
            match self.store.upload(&sealed).await {
                Ok(receipt) => {
                    info!(archive_id = %receipt.archive_id, bytes = sealed.len(), "cloud fragment uploaded");
                    cloud_archive_id = Some(receipt.archive_id);
                    file_ids = receipt.file_ids;
                }
                Err(e) => {
                    warn!(error = %e, "cloud upload failed, archive will be local-only");
                    upload_error = Some(e.to_string());
                }
            }
        }

        // Assemble fragments and records. On the degraded path each file's
        // cloud part folds back into the local fragment, so no bytes depend
        // on a server we could not reach.
        let degraded = cloud_archive_id.is_none();
        let mut local_fragment = Vec::new();
        let mut records = Vec::with_capacity(prepared.len());
        let mut cloud_offset = 0u64;
        for (idx, file) in prepared.iter().enumerate() {
            let local_offset = local_fragment.len() as u64;
            local_fragment.extend_from_slice(&file.local);
            let (local_size, cloud_size, file_cloud_offset) = if degraded {
                local_fragment.extend_from_slice(&file.cloud);
                (file.compressed_size, 0, 0)
            } else {
                let off = cloud_offset;
                cloud_offset += file.cloud.len() as u64;
                (file.local.len() as u64, file.cloud.len() as u64, off)
            };
            records.push(FileRecord {
                name: file.name.clone(),
                path: Some(file.path.clone()),
                size: file.original_size,
                compressed_size: file.compressed_size,
                local_offset,
                local_size,
                cloud_offset: file_cloud_offset,
                cloud_size,
                checksum: file.checksum.clone(),
                cloud_id: if degraded {
                    None
                } else {
                    file_ids.get(idx).cloned()
                },
            });
        }

        let meta = ArchiveMeta {
            version: FORMAT_VERSION.to_string(),
            created: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            total_size,
            compression,
            cloud_archive_id: cloud_archive_id.clone(),
            files: records,
        };

        self.check_cancel()?;
        self.report(95, "Writing archive file", expected_total);
        let parent = out.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match parent {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        container::write_archive(&mut tmp, &meta, &local_fragment)?;
        tmp.as_file().sync_all()?;
        tmp.persist(out).map_err(|e| ArchiveError::Io(e.error))?;

        let archive_size = std::fs::metadata(out)?.len();
        let compression_ratio = if total_size > 0 {
            (1.0 - archive_size as f64 / total_size as f64) * 100.0
        } else {
            0.0
        };
        self.report(100, "Archive created", expected_total);
        info!(
            path = %out.display(),
            total_size,
            archive_size,
            ratio = format_args!("{compression_ratio:.1}%"),
            "archive created"
        );

        Ok(ArchiveSummary {
            archive_path: out.to_path_buf(),
            total_size,
            archive_size,
            compression_ratio,
            cloud_archive_id,
            skipped,
            upload_error,
        })
    }

    /// Extract an archive into `out_dir`. Fully-local archives make zero
    /// network calls.
    #[instrument(skip(self, archive_path, out_dir), fields(policy = ?policy))]
    pub async fn extract_archive(
        &self,
        archive_path: &Path,
        out_dir: &Path,
        policy: VerifyPolicy,
    ) -> Result<ExtractReport> {
        self.processed.store(0, Ordering::Relaxed);
        let archive = container::read_archive(archive_path)?;
        let total_files = archive.meta.files.len();
        debug!(files = total_files, "archive opened");

        let cloud_data = match &archive.meta.cloud_archive_id {
            Some(id) => {
                self.check_cancel()?;
                self.report(10, "Downloading from cloud", archive.meta.total_size);
                let sealed = self.store.download(id).await?;
                decrypt_fragment(&self.keys.master_key()?, &sealed)?
            }
            None => Vec::new(),
        };

        std::fs::create_dir_all(out_dir)?;
        let mut report = ExtractReport::default();

        for (idx, record) in archive.meta.files.iter().enumerate() {
            self.check_cancel()?;
            self.report(
                20 + (idx * 70 / total_files.max(1)) as u8,
                format!("Extracting {} ({}/{})", record.name, idx + 1, total_files),
                archive.meta.total_size,
            );

            match self.extract_one(record, archive.meta.compression, &archive.local_data, &cloud_data)
            {
                Ok(bytes) => {
                    let dest = out_dir.join(&record.name);
                    let mut tmp = tempfile::NamedTempFile::new_in(out_dir)?;
                    tmp.write_all(&bytes)?;
                    tmp.persist(&dest).map_err(|e| ArchiveError::Io(e.error))?;
                    report.written.push(dest);
                }
                Err(e) if policy == VerifyPolicy::BestEffort && is_per_file(&e) => {
                    warn!(name = %record.name, error = %e, "file withheld");
                    report.failed.push(FileFailure {
                        name: record.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        self.report(100, "Extraction completed", archive.meta.total_size);
        info!(
            written = report.written.len(),
            failed = report.failed.len(),
            "extraction finished"
        );
        Ok(report)
    }

    fn extract_one(
        &self,
        record: &FileRecord,
        compression: CompressionId,
        local_data: &[u8],
        cloud_data: &[u8],
    ) -> Result<Vec<u8>> {
        sanitize_file_name(&record.name)?;
        let local = slice_range(local_data, record.local_offset, record.local_size, record, "local")?;
        let cloud = slice_range(cloud_data, record.cloud_offset, record.cloud_size, record, "cloud")?;
        let compressed = merge(local, cloud);
        let bytes = decompress_to_vec(&compressed, compression, record.size)?;
        let computed = checksum::sha256_hex(&bytes);
        if computed != record.checksum {
            return Err(ArchiveError::ChecksumMismatch {
                name: record.name.clone(),
                expected: record.checksum.clone(),
                computed,
            });
        }
        Ok(bytes)
    }
}

/// Errors that condemn one file but not the archive.
fn is_per_file(e: &ArchiveError) -> bool {
    matches!(
        e,
        ArchiveError::ChecksumMismatch { .. }
            | ArchiveError::DecompressionFailed(_)
            | ArchiveError::RangeOutOfBounds { .. }
            | ArchiveError::UnsafeFileName { .. }
    )
}

fn percent_of(processed: u64, total: u64, scale: u8) -> u8 {
    if total == 0 {
        0
    } else {
        ((processed as u128 * scale as u128) / total as u128).min(scale as u128) as u8
    }
}

fn slice_range<'a>(
    data: &'a [u8],
    offset: u64,
    len: u64,
    record: &FileRecord,
    region: &'static str,
) -> Result<&'a [u8]> {
    let end = offset.checked_add(len).unwrap_or(u64::MAX);
    if end > data.len() as u64 {
        return Err(ArchiveError::RangeOutOfBounds {
            name: record.name.clone(),
            region,
            offset,
            len,
            fragment_len: data.len() as u64,
        });
    }
    Ok(&data[offset as usize..end as usize])
}

/// Reject names that would escape the output directory.
fn sanitize_file_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != ".."
        && name != "."
        && Path::new(name).file_name().map(|n| n == name).unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(ArchiveError::UnsafeFileName {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MemoryCloudStore, NullCloudStore};
    use crate::encryption::MasterKey;
    use crate::keystore::StaticKeyProvider;
    use crate::split::SplitRatio;

    fn test_engine(store: Arc<dyn CloudStore>) -> ArchiveEngine {
        let mut config = Config::default();
        config.split = SplitRatio::new(10).unwrap();
        config.keep_local_below = 0;
        ArchiveEngine::new(
            config,
            Arc::new(StaticKeyProvider(MasterKey::from_bytes([5u8; 32]))),
            store,
        )
    }

    fn write_input(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn create_then_extract_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_input(dir.path(), "a.bin", &vec![1u8; 200_000]);
        let b_data: Vec<u8> = (0..90_000u32).map(|i| (i % 256) as u8).collect();
        let b = write_input(dir.path(), "b.bin", &b_data);
        let archive_path = dir.path().join("backup.wca");

        let store = Arc::new(MemoryCloudStore::new());
        let engine = test_engine(store.clone());
        let summary = engine
            .create_archive(&[a, b], &archive_path)
            .await
            .unwrap();
        assert!(summary.cloud_archive_id.is_some());
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.total_size, 290_000);
        assert_eq!(store.upload_calls(), 1);

        let out_dir = dir.path().join("restore");
        let report = engine
            .extract_archive(&archive_path, &out_dir, VerifyPolicy::BestEffort)
            .await
            .unwrap();
        assert_eq!(report.written.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(std::fs::read(out_dir.join("a.bin")).unwrap(), vec![1u8; 200_000]);
        assert_eq!(std::fs::read(out_dir.join("b.bin")).unwrap(), b_data);
    }

    #[tokio::test]
    async fn stored_fragment_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "plain.txt", &b"plaintext ".repeat(10_000));
        let store = Arc::new(MemoryCloudStore::new());
        let engine = test_engine(store.clone());
        let summary = engine
            .create_archive(&[input], &dir.path().join("x.wca"))
            .await
            .unwrap();
        let fragment = store.fragment(summary.cloud_archive_id.as_ref().unwrap()).unwrap();
        // nonce + tag overhead, and no plaintext visible
        assert!(fragment.len() > crate::encryption::NONCE_LEN + crate::encryption::TAG_LEN);
        assert!(!fragment.windows(9).any(|w| w == &b"plaintext"[..]));
    }

    #[tokio::test]
    async fn offline_upload_degrades_to_local_only() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"important bytes ".repeat(5_000);
        let input = write_input(dir.path(), "doc.bin", &data);
        let archive_path = dir.path().join("doc.wca");

        let engine = test_engine(Arc::new(NullCloudStore));
        let summary = engine.create_archive(&[input], &archive_path).await.unwrap();
        assert!(summary.cloud_archive_id.is_none());
        assert!(summary.upload_error.is_some());

        // extraction requires no network at all
        let out_dir = dir.path().join("restore");
        let report = engine
            .extract_archive(&archive_path, &out_dir, VerifyPolicy::FailFast)
            .await
            .unwrap();
        assert_eq!(report.written.len(), 1);
        assert_eq!(std::fs::read(out_dir.join("doc.bin")).unwrap(), data);
    }

    #[tokio::test]
    async fn zero_file_archive_is_valid_and_fully_local() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("empty.wca");
        let store = Arc::new(MemoryCloudStore::new());
        let engine = test_engine(store.clone());

        let summary = engine.create_archive(&[], &archive_path).await.unwrap();
        assert!(summary.cloud_archive_id.is_none());
        assert_eq!(summary.total_size, 0);
        assert_eq!(store.upload_calls(), 0);

        let report = engine
            .extract_archive(&archive_path, &dir.path().join("out"), VerifyPolicy::FailFast)
            .await
            .unwrap();
        assert!(report.written.is_empty());
        assert_eq!(store.download_calls(), 0);
    }

    #[tokio::test]
    async fn unreadable_input_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_input(dir.path(), "good.bin", &[9u8; 10_000]);
        let missing = dir.path().join("missing.bin");
        let engine = test_engine(Arc::new(MemoryCloudStore::new()));

        let summary = engine
            .create_archive(&[good, missing], &dir.path().join("y.wca"))
            .await
            .unwrap();
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.total_size, 10_000);
    }

    #[tokio::test]
    async fn all_inputs_failing_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(Arc::new(MemoryCloudStore::new()));
        let err = engine
            .create_archive(
                &[dir.path().join("no1"), dir.path().join("no2")],
                &dir.path().join("z.wca"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::AllInputsFailed { failed: 2 }));
    }

    #[tokio::test]
    async fn cancelled_create_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(dir.path(), "a.bin", &[1u8; 1000]);
        let archive_path = dir.path().join("a.wca");
        let engine = test_engine(Arc::new(MemoryCloudStore::new()));
        engine.cancel_flag().cancel();
        let err = engine.create_archive(&[input], &archive_path).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Cancelled));
        assert!(!archive_path.exists());
    }

    #[test]
    fn file_name_sanitizer() {
        assert!(sanitize_file_name("report.txt").is_ok());
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("a/b.txt").is_err());
        assert!(sanitize_file_name("/etc/passwd").is_err());
    }
}
