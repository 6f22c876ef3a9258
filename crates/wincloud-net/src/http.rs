//! HTTP implementation of the cloud store contract.
//!
//! Speaks the documented REST surface: bearer-token auth, whole-fragment
//! upload below the chunk threshold, chunked upload with `X-Chunk-*`
//! headers above it, streamed download, and delete. Every request runs
//! under the bounded retry executor; authorization failures are surfaced
//! immediately and only clear the cached token.

use crate::retry::{RetryConfig, RetryExecutor};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;
use wincloud_core::cloud::{CloudError, CloudResult, CloudStore, UploadReceipt};
use wincloud_core::Config;

#[derive(Serialize)]
struct AuthRequest<'a> {
    user_id: &'a str,
    client_version: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Deserialize)]
struct ReceiptResponse {
    archive_id: String,
    #[serde(default)]
    file_ids: Vec<String>,
}

#[derive(Deserialize)]
struct ChunkResponse {
    upload_id: String,
}

struct ChunkSession {
    total_size: u64,
    next_index: u32,
    server_upload_id: Option<String>,
}

/// Cloud store client over the WinCloud REST API.
pub struct HttpCloudStore {
    base: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
    sessions: Mutex<HashMap<String, ChunkSession>>,
    retry: RetryExecutor,
    chunk_size: usize,
    device_id: String,
}

impl HttpCloudStore {
    /// Build a client from the shared configuration.
    pub fn new(config: &Config) -> CloudResult<Self> {
        if config.network.chunk_size == 0 {
            return Err(CloudError::Protocol(
                "chunk_size must be at least 1 byte".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.network.timeout_secs))
            .build()
            .map_err(|e| CloudError::Protocol(format!("http client: {e}")))?;
        Ok(Self {
            base: config.server_url.trim_end_matches('/').to_string(),
            http,
            token: RwLock::new(None),
            sessions: Mutex::new(HashMap::new()),
            retry: RetryExecutor::new(RetryConfig::with_max_retries(config.network.max_retries)),
            chunk_size: config.network.chunk_size,
            device_id: device_id(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base)
    }

    async fn authenticate(&self) -> CloudResult<String> {
        let resp = self
            .http
            .post(self.api("auth"))
            .json(&AuthRequest {
                user_id: &self.device_id,
                client_version: env!("CARGO_PKG_VERSION"),
            })
            .send()
            .await
            .map_err(request_error)?;
        let resp = check_status(resp)?;
        let auth: AuthResponse = resp.json().await.map_err(request_error)?;
        info!("authenticated with cloud server");
        Ok(auth.token)
    }

    /// Cached token, authenticating on first use.
    async fn bearer(&self) -> CloudResult<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        let token = self.authenticate().await?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next call re-authenticates.
    async fn forget_token(&self) {
        *self.token.write().await = None;
    }

    async fn receipt_from(&self, resp: reqwest::Response) -> CloudResult<UploadReceipt> {
        let body: ReceiptResponse = resp.json().await.map_err(request_error)?;
        Ok(UploadReceipt {
            archive_id: body.archive_id,
            file_ids: body.file_ids,
        })
    }

    async fn upload_whole(&self, fragment: &[u8]) -> CloudResult<UploadReceipt> {
        let token = self.bearer().await?;
        let resp = self
            .http
            .post(self.api("archives/upload"))
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(fragment.to_vec())
            .send()
            .await
            .map_err(request_error)?;
        let resp = self.checked(resp).await?;
        self.receipt_from(resp).await
    }

    /// Surface status errors, clearing the token cache on auth failures.
    async fn checked(&self, resp: reqwest::Response) -> CloudResult<reqwest::Response> {
        if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
            self.forget_token().await;
        }
        check_status(resp)
    }
}

#[async_trait]
impl CloudStore for HttpCloudStore {
    async fn health(&self) -> CloudResult<()> {
        let resp = self
            .http
            .get(self.api("health"))
            .send()
            .await
            .map_err(request_error)?;
        check_status(resp)?;
        Ok(())
    }

    async fn upload(&self, fragment: &[u8]) -> CloudResult<UploadReceipt> {
        if fragment.len() <= self.chunk_size {
            return self
                .retry
                .execute("upload", || self.upload_whole(fragment))
                .await;
        }

        // Large fragment: strict in-order chunk sequence, then finalize.
        let upload_id = self.begin_upload(fragment.len() as u64).await?;
        for (index, span) in chunk_spans(fragment.len(), self.chunk_size).into_iter().enumerate() {
            let chunk = &fragment[span];
            self.retry
                .execute("upload_chunk", || {
                    self.upload_chunk(&upload_id, index as u32, chunk)
                })
                .await?;
        }
        self.retry
            .execute("finalize_upload", || self.finalize_upload(&upload_id))
            .await
    }

    async fn begin_upload(&self, total_size: u64) -> CloudResult<String> {
        // The server opens its session on the first chunk; this handle is
        // client-side bookkeeping that enforces the ordering contract.
        let upload_id = Uuid::new_v4().to_string();
        self.sessions.lock().expect("sessions lock").insert(
            upload_id.clone(),
            ChunkSession {
                total_size,
                next_index: 0,
                server_upload_id: None,
            },
        );
        Ok(upload_id)
    }

    async fn upload_chunk(&self, upload_id: &str, index: u32, chunk: &[u8]) -> CloudResult<()> {
        let (total_size, server_id) = {
            let sessions = self.sessions.lock().expect("sessions lock");
            let session = sessions
                .get(upload_id)
                .ok_or_else(|| CloudError::NotFound(format!("upload session {upload_id}")))?;
            if index != session.next_index {
                return Err(CloudError::Protocol(format!(
                    "chunk index {index} out of order, expected {}",
                    session.next_index
                )));
            }
            (session.total_size, session.server_upload_id.clone())
        };

        let token = self.bearer().await?;
        let mut req = self
            .http
            .post(self.api("archives/upload"))
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header("X-Chunk-Index", index.to_string())
            .header("X-Total-Size", total_size.to_string())
            .header("X-Chunk-Size", chunk.len().to_string());
        if let Some(id) = &server_id {
            req = req.header("X-Upload-Id", id.clone());
        }
        let resp = req
            .body(chunk.to_vec())
            .send()
            .await
            .map_err(request_error)?;
        let resp = self.checked(resp).await?;
        let body: ChunkResponse = resp.json().await.map_err(request_error)?;
        debug!(index, bytes = chunk.len(), "chunk uploaded");

        let mut sessions = self.sessions.lock().expect("sessions lock");
        if let Some(session) = sessions.get_mut(upload_id) {
            session.next_index = index + 1;
            session.server_upload_id = Some(body.upload_id);
        }
        Ok(())
    }

    async fn finalize_upload(&self, upload_id: &str) -> CloudResult<UploadReceipt> {
        let server_id = {
            let sessions = self.sessions.lock().expect("sessions lock");
            let session = sessions
                .get(upload_id)
                .ok_or_else(|| CloudError::NotFound(format!("upload session {upload_id}")))?;
            session
                .server_upload_id
                .clone()
                .ok_or_else(|| CloudError::Protocol("finalize before any chunk".to_string()))?
        };

        let token = self.bearer().await?;
        let resp = self
            .http
            .post(self.api(&format!("archives/upload/finalize/{server_id}")))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(request_error)?;
        let resp = self.checked(resp).await?;
        let receipt = self.receipt_from(resp).await?;
        self.sessions.lock().expect("sessions lock").remove(upload_id);
        info!(archive_id = %receipt.archive_id, "chunked upload finalized");
        Ok(receipt)
    }

    async fn download(&self, archive_id: &str) -> CloudResult<Vec<u8>> {
        self.retry
            .execute("download", || async {
                let token = self.bearer().await?;
                let resp = self
                    .http
                    .get(self.api(&format!("archives/{archive_id}/download")))
                    .bearer_auth(&token)
                    .send()
                    .await
                    .map_err(request_error)?;
                let resp = self.checked(resp).await?;
                let bytes = resp.bytes().await.map_err(request_error)?;
                Ok(bytes.to_vec())
            })
            .await
    }

    async fn delete(&self, archive_id: &str) -> CloudResult<()> {
        self.retry
            .execute("delete", || async {
                let token = self.bearer().await?;
                let resp = self
                    .http
                    .delete(self.api(&format!("archives/{archive_id}")))
                    .bearer_auth(&token)
                    .send()
                    .await
                    .map_err(request_error)?;
                self.checked(resp).await?;
                Ok(())
            })
            .await
    }
}

/// Byte ranges of the in-order chunk sequence for a fragment. A zero
/// `chunk_size` (rejected at client construction) yields a single span
/// rather than an unbounded sequence.
pub fn chunk_spans(total: usize, chunk_size: usize) -> Vec<Range<usize>> {
    if chunk_size == 0 {
        return if total == 0 { Vec::new() } else { vec![0..total] };
    }
    let mut spans = Vec::with_capacity(total.div_ceil(chunk_size));
    let mut start = 0;
    while start < total {
        let end = (start + chunk_size).min(total);
        spans.push(start..end);
        start = end;
    }
    spans
}

/// Map a transport-level failure; timeouts and connection errors retry.
fn request_error(e: reqwest::Error) -> CloudError {
    CloudError::Transient(e.to_string())
}

/// Map an HTTP status into the cloud error taxonomy.
fn check_status(resp: reqwest::Response) -> CloudResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CloudError::Unauthorized(format!("server returned {status}"))
        }
        StatusCode::NOT_FOUND => CloudError::NotFound(resp.url().path().to_string()),
        StatusCode::TOO_MANY_REQUESTS => CloudError::RateLimited,
        s if s.is_server_error() => CloudError::Transient(format!("server returned {status}")),
        _ => CloudError::Protocol(format!("unexpected status {status}")),
    })
}

fn device_id() -> String {
    // Stable per machine+user, like the original client's device hash.
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "wincloud-host".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let digest = Sha256::digest(format!("{host}-{user}").as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twelve_megabytes_make_three_ordered_chunks() {
        let mib = 1024 * 1024;
        let spans = chunk_spans(12 * mib, 5 * mib);
        assert_eq!(
            spans,
            vec![0..5 * mib, 5 * mib..10 * mib, 10 * mib..12 * mib]
        );
        assert_eq!(spans[2].len(), 2 * mib);
    }

    #[test]
    fn exact_multiple_has_no_tail_chunk() {
        let spans = chunk_spans(10, 5);
        assert_eq!(spans, vec![0..5, 5..10]);
    }

    #[test]
    fn empty_fragment_has_no_chunks() {
        assert!(chunk_spans(0, 5).is_empty());
    }

    #[test]
    fn zero_chunk_size_does_not_panic() {
        assert_eq!(chunk_spans(1, 0), vec![0..1]);
        assert!(chunk_spans(0, 0).is_empty());
    }

    #[test]
    fn constructor_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.network.chunk_size = 0;
        assert!(matches!(
            HttpCloudStore::new(&config),
            Err(CloudError::Protocol(_))
        ));
    }

    #[test]
    fn device_id_is_stable_hex() {
        let a = device_id();
        let b = device_id();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn chunk_session_enforces_client_side_order() {
        let store = HttpCloudStore::new(&Config::default()).unwrap();
        let id = store.begin_upload(100).await.unwrap();
        // out-of-order index is rejected before any request is sent
        let err = store.upload_chunk(&id, 1, b"xx").await.unwrap_err();
        assert!(matches!(err, CloudError::Protocol(_)));
    }

    #[tokio::test]
    async fn finalize_without_chunks_is_a_protocol_error() {
        let store = HttpCloudStore::new(&Config::default()).unwrap();
        let id = store.begin_upload(100).await.unwrap();
        assert!(matches!(
            store.finalize_upload(&id).await,
            Err(CloudError::Protocol(_))
        ));
    }
}
