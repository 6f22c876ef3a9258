//! Cloud store contract consumed by the archive pipeline.
//!
//! The engine never talks HTTP itself; it moves encrypted cloud fragments
//! through this trait. `wincloud-net` provides the real client. This module
//! also carries two in-crate implementations: `MemoryCloudStore` for tests
//! and `NullCloudStore` for the permanently-offline case.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Default chunk threshold for large uploads: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Errors surfaced by cloud store operations.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// Timeout, connection reset, or server-side 5xx. Retryable.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// The archive or upload session does not exist on the server.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid or expired token. Never retried silently.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// HTTP 429: per-user rate limit exceeded. Retryable after backoff.
    #[error("rate limited by server")]
    RateLimited,

    /// The client or server violated the upload protocol
    /// (out-of-order chunk, duplicate index, size disagreement).
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl CloudError {
    /// Whether a bounded retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Transient(_) | CloudError::RateLimited)
    }
}

/// Result alias for cloud store operations.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Server acknowledgement of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Opaque handle correlating the client archive with its remote fragment.
    pub archive_id: String,
    /// Per-file server identifiers, in the order the files were packed.
    /// May be empty if the server does not track files individually.
    pub file_ids: Vec<String>,
}

/// Remote storage for encrypted cloud fragments.
///
/// Large fragments must be movable through the chunked triple
/// (`begin_upload` / `upload_chunk` / `finalize_upload`) with strictly
/// ascending chunk indices; `upload` is the whole-fragment convenience form.
#[async_trait]
pub trait CloudStore: Send + Sync {
    /// Probe server availability.
    async fn health(&self) -> CloudResult<()>;

    /// Upload a whole fragment, chunking internally when it exceeds the
    /// implementation's threshold.
    async fn upload(&self, fragment: &[u8]) -> CloudResult<UploadReceipt>;

    /// Open a chunked upload session for `total_size` bytes.
    async fn begin_upload(&self, total_size: u64) -> CloudResult<String>;

    /// Upload one chunk. Indices start at 0 and must arrive in order,
    /// without duplicates.
    async fn upload_chunk(&self, upload_id: &str, index: u32, chunk: &[u8]) -> CloudResult<()>;

    /// Finalize a session into a permanent fragment.
    async fn finalize_upload(&self, upload_id: &str) -> CloudResult<UploadReceipt>;

    /// Retrieve a previously uploaded fragment in full.
    async fn download(&self, archive_id: &str) -> CloudResult<Vec<u8>>;

    /// Delete a fragment from remote storage.
    async fn delete(&self, archive_id: &str) -> CloudResult<()>;
}

struct UploadSession {
    total_size: u64,
    received: Vec<u8>,
    next_index: u32,
}

/// In-memory cloud store used by tests and examples.
///
/// Enforces the same session rules the real server documents: chunks must
/// arrive with strictly ascending indices and the received byte count must
/// equal the declared total at finalize time.
#[derive(Default)]
pub struct MemoryCloudStore {
    archives: Mutex<HashMap<String, Vec<u8>>>,
    sessions: Mutex<HashMap<String, UploadSession>>,
    upload_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl MemoryCloudStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed whole-fragment or finalized chunked uploads.
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::Relaxed)
    }

    /// Number of download calls served.
    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::Relaxed)
    }

    /// Stored fragment bytes for an archive id, if any.
    pub fn fragment(&self, archive_id: &str) -> Option<Vec<u8>> {
        self.archives
            .lock()
            .expect("archives lock")
            .get(archive_id)
            .cloned()
    }
}

#[async_trait]
impl CloudStore for MemoryCloudStore {
    async fn health(&self) -> CloudResult<()> {
        Ok(())
    }

    async fn upload(&self, fragment: &[u8]) -> CloudResult<UploadReceipt> {
        let archive_id = Uuid::new_v4().to_string();
        self.archives
            .lock()
            .expect("archives lock")
            .insert(archive_id.clone(), fragment.to_vec());
        self.upload_calls.fetch_add(1, Ordering::Relaxed);
        Ok(UploadReceipt {
            archive_id,
            file_ids: Vec::new(),
        })
    }

    async fn begin_upload(&self, total_size: u64) -> CloudResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        self.sessions.lock().expect("sessions lock").insert(
            upload_id.clone(),
            UploadSession {
                total_size,
                received: Vec::new(),
                next_index: 0,
            },
        );
        Ok(upload_id)
    }

    async fn upload_chunk(&self, upload_id: &str, index: u32, chunk: &[u8]) -> CloudResult<()> {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        let session = sessions
            .get_mut(upload_id)
            .ok_or_else(|| CloudError::NotFound(format!("upload session {upload_id}")))?;
        if index != session.next_index {
            return Err(CloudError::Protocol(format!(
                "chunk index {index} out of order, expected {}",
                session.next_index
            )));
        }
        if session.received.len() as u64 + chunk.len() as u64 > session.total_size {
            return Err(CloudError::Protocol(format!(
                "chunk overruns declared total of {} bytes",
                session.total_size
            )));
        }
        session.received.extend_from_slice(chunk);
        session.next_index += 1;
        Ok(())
    }

    async fn finalize_upload(&self, upload_id: &str) -> CloudResult<UploadReceipt> {
        let session = self
            .sessions
            .lock()
            .expect("sessions lock")
            .remove(upload_id)
            .ok_or_else(|| CloudError::NotFound(format!("upload session {upload_id}")))?;
        if session.received.len() as u64 != session.total_size {
            return Err(CloudError::Protocol(format!(
                "finalize with {} of {} bytes received",
                session.received.len(),
                session.total_size
            )));
        }
        let archive_id = Uuid::new_v4().to_string();
        self.archives
            .lock()
            .expect("archives lock")
            .insert(archive_id.clone(), session.received);
        self.upload_calls.fetch_add(1, Ordering::Relaxed);
        Ok(UploadReceipt {
            archive_id,
            file_ids: Vec::new(),
        })
    }

    async fn download(&self, archive_id: &str) -> CloudResult<Vec<u8>> {
        self.download_calls.fetch_add(1, Ordering::Relaxed);
        self.archives
            .lock()
            .expect("archives lock")
            .get(archive_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("archive {archive_id}")))
    }

    async fn delete(&self, archive_id: &str) -> CloudResult<()> {
        self.archives
            .lock()
            .expect("archives lock")
            .remove(archive_id)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(format!("archive {archive_id}")))
    }
}

/// A store that is never reachable. Every call fails with a transient error,
/// which drives the pipeline down its degraded local-only path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCloudStore;

impl NullCloudStore {
    fn offline<T>() -> CloudResult<T> {
        Err(CloudError::Transient("cloud store offline".to_string()))
    }
}

#[async_trait]
impl CloudStore for NullCloudStore {
    async fn health(&self) -> CloudResult<()> {
        Self::offline()
    }
    async fn upload(&self, _fragment: &[u8]) -> CloudResult<UploadReceipt> {
        Self::offline()
    }
    async fn begin_upload(&self, _total_size: u64) -> CloudResult<String> {
        Self::offline()
    }
    async fn upload_chunk(&self, _upload_id: &str, _index: u32, _chunk: &[u8]) -> CloudResult<()> {
        Self::offline()
    }
    async fn finalize_upload(&self, _upload_id: &str) -> CloudResult<UploadReceipt> {
        Self::offline()
    }
    async fn download(&self, _archive_id: &str) -> CloudResult<Vec<u8>> {
        Self::offline()
    }
    async fn delete(&self, _archive_id: &str) -> CloudResult<()> {
        Self::offline()
    }
}
