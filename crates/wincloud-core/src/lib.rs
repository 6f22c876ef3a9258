#![warn(missing_docs)]

//! WinCloud archive engine: hybrid local/cloud `.wca` archives.
//!
//! Write path: files → two-stage compress (LZ4 + Zstd) → per-file split →
//! {local fragment → container; cloud fragment → AES-256-GCM → upload}
//! Read path:  container + download → decrypt → merge → decompress → verify

pub mod checksum;
pub mod cloud;
pub mod compression;
pub mod config;
pub mod container;
pub mod encryption;
pub mod error;
pub mod keystore;
pub mod pipeline;
pub mod split;

pub use cloud::{
    CloudError, CloudResult, CloudStore, MemoryCloudStore, NullCloudStore, UploadReceipt,
    DEFAULT_CHUNK_SIZE,
};
pub use compression::{CompressedFile, CompressionId};
pub use config::{Config, NetworkConfig};
pub use container::{Archive, ArchiveMeta, FileRecord, FORMAT_VERSION, MAGIC};
pub use encryption::MasterKey;
pub use error::{ArchiveError, Result};
pub use keystore::{FileKeyStore, KeyProvider, StaticKeyProvider};
pub use pipeline::{
    ArchiveEngine, ArchiveSummary, CancelFlag, ExtractReport, FileFailure, ProgressFn,
    ProgressUpdate, SkippedFile, VerifyPolicy,
};
pub use split::SplitRatio;
