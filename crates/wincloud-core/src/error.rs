//! Error types for the WinCloud archive engine.
//!
//! The taxonomy follows the recovery semantics of the pipeline: input errors
//! are per-file and recoverable, format errors are fatal for the archive,
//! integrity errors are fatal for the affected file only, and cloud errors
//! carry their own retryability classification.

use crate::cloud::CloudError;
use thiserror::Error;

/// All errors that can occur while creating, reading, or extracting archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A single input file could not be read. Recoverable: the batch
    /// continues with the remaining files.
    #[error("cannot read input file {path}: {reason}")]
    InputFile { path: String, reason: String },

    /// Every input file failed, so there is nothing to archive.
    #[error("all {failed} input file(s) failed to read")]
    AllInputsFailed { failed: usize },

    /// The file does not start with the WinCloud magic bytes.
    #[error("not a recognized WinCloud archive (bad magic)")]
    InvalidMagic,

    /// The file ends before a declared region is complete.
    #[error("truncated archive: {region} needs {needed} bytes, {available} available")]
    Truncated {
        region: &'static str,
        needed: u64,
        available: u64,
    },

    /// The metadata block is not valid JSON or violates the schema.
    #[error("malformed archive metadata: {0}")]
    MalformedMetadata(String),

    /// Metadata could not be serialized when writing an archive.
    #[error("metadata encoding failed: {0}")]
    MetadataEncode(String),

    /// The metadata block exceeds the 4-byte length prefix.
    #[error("metadata block too large: {size} bytes")]
    MetadataTooLarge { size: usize },

    /// The local fragment length disagrees with the sum of the per-file
    /// local ranges declared in the metadata.
    #[error("local fragment length mismatch: metadata declares {declared} bytes, found {actual}")]
    FragmentLengthMismatch { declared: u64, actual: u64 },

    /// A file's local/cloud range points outside the fragment it names.
    #[error("file {name}: {region} range [{offset}, +{len}) exceeds fragment of {fragment_len} bytes")]
    RangeOutOfBounds {
        name: String,
        region: &'static str,
        offset: u64,
        len: u64,
        fragment_len: u64,
    },

    /// Files declare cloud ranges but the archive has no cloud identifier.
    #[error("archive declares cloud data but carries no cloud archive id")]
    CloudFragmentMissing,

    /// Content digest mismatch after reassembly. Fatal for this file only.
    #[error("checksum mismatch for {name}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        computed: String,
    },

    /// AEAD authentication failed: wrong key, or tampered/corrupted fragment.
    #[error("fragment decryption failed: authentication tag mismatch")]
    DecryptionAuthFailed,

    /// Encryption failed before any ciphertext was produced.
    #[error("fragment encryption failed: {0}")]
    EncryptionFailed(String),

    /// A compression stage failed.
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// A decompression stage failed.
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// A split ratio outside 0..=100.
    #[error("invalid split ratio: local {local_percent}%")]
    InvalidRatio { local_percent: u8 },

    /// Master key could not be loaded or created.
    #[error("key store error: {0}")]
    KeyStore(String),

    /// Configuration could not be loaded or written.
    #[error("configuration error: {0}")]
    Config(String),

    /// A file record names an unsafe output path.
    #[error("unsafe file name in archive: {name}")]
    UnsafeFileName { name: String },

    /// The operation was cancelled between steps.
    #[error("operation cancelled")]
    Cancelled,

    /// A cloud store operation failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// I/O error outside the per-file input path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenient crate-wide result type.
pub type Result<T> = std::result::Result<T, ArchiveError>;
