//! Chunked upload conformance tests
//!
//! Verifies the coordinator contract against the in-memory cloud store:
//! fragments over the 5 MB threshold travel as a strictly-ordered chunk
//! sequence and only materialize at finalize.

use wincloud_core::cloud::{CloudError, CloudStore, MemoryCloudStore, DEFAULT_CHUNK_SIZE};
use wincloud_net::http::chunk_spans;

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn test_twelve_megabyte_fragment_uploads_as_three_chunks() {
    let fragment: Vec<u8> = (0..12 * MIB).map(|i| (i % 251) as u8).collect();
    let spans = chunk_spans(fragment.len(), DEFAULT_CHUNK_SIZE);
    assert_eq!(spans.len(), 3);
    assert_eq!(spans[0].len(), 5 * MIB);
    assert_eq!(spans[1].len(), 5 * MIB);
    assert_eq!(spans[2].len(), 2 * MIB);

    let store = MemoryCloudStore::new();
    let upload_id = store.begin_upload(fragment.len() as u64).await.unwrap();
    for (index, span) in spans.into_iter().enumerate() {
        store
            .upload_chunk(&upload_id, index as u32, &fragment[span])
            .await
            .unwrap();
    }
    let receipt = store.finalize_upload(&upload_id).await.unwrap();
    assert_eq!(store.fragment(&receipt.archive_id).unwrap(), fragment);
}

#[tokio::test]
async fn test_chunk_replay_is_rejected() {
    let store = MemoryCloudStore::new();
    let upload_id = store.begin_upload(10).await.unwrap();
    store.upload_chunk(&upload_id, 0, &[1; 5]).await.unwrap();
    let err = store.upload_chunk(&upload_id, 0, &[1; 5]).await.unwrap_err();
    assert!(matches!(err, CloudError::Protocol(_)));
}

#[tokio::test]
async fn test_skipped_chunk_index_is_rejected() {
    let store = MemoryCloudStore::new();
    let upload_id = store.begin_upload(10).await.unwrap();
    store.upload_chunk(&upload_id, 0, &[1; 5]).await.unwrap();
    let err = store.upload_chunk(&upload_id, 2, &[1; 5]).await.unwrap_err();
    assert!(matches!(err, CloudError::Protocol(_)));
}

#[tokio::test]
async fn test_finalize_before_last_chunk_is_rejected() {
    let store = MemoryCloudStore::new();
    let upload_id = store.begin_upload(10).await.unwrap();
    store.upload_chunk(&upload_id, 0, &[1; 5]).await.unwrap();
    let err = store.finalize_upload(&upload_id).await.unwrap_err();
    assert!(matches!(err, CloudError::Protocol(_)));
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let store = MemoryCloudStore::new();
    let err = store.upload_chunk("no-such-id", 0, &[1; 5]).await.unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
}

#[test]
fn test_fragment_at_exact_threshold_needs_one_chunk() {
    let spans = chunk_spans(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_SIZE);
    assert_eq!(spans.len(), 1);
}

#[test]
fn test_one_byte_over_threshold_needs_a_tail_chunk() {
    let spans = chunk_spans(DEFAULT_CHUNK_SIZE + 1, DEFAULT_CHUNK_SIZE);
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[1].len(), 1);
}
