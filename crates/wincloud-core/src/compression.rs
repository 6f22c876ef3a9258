//! Two-stage compression pipeline: LZ4 frame (speed) then Zstd (ratio).
//!
//! Stage order is recorded in archive metadata as a versioned identifier so
//! decompression always reverses the exact stages that were applied, and
//! future format versions can introduce new combinations without breaking
//! old archives.

use crate::checksum::HashingReader;
use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

/// Zstd level for the ratio stage. 19 trades speed for maximum density; the
/// LZ4 stage in front keeps the hot path cheap.
pub const RATIO_STAGE_LEVEL: i32 = 19;

/// Identifier of the stage combination applied to a file's bytes.
///
/// Serialized into archive metadata; decompression dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionId {
    /// Stage 1: LZ4 frame (speed). Stage 2: Zstd level 19 (ratio).
    #[default]
    #[serde(rename = "lz4+zstd")]
    Lz4Zstd,
}

impl CompressionId {
    /// The metadata string form, e.g. `"lz4+zstd"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionId::Lz4Zstd => "lz4+zstd",
        }
    }
}

impl std::fmt::Display for CompressionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compressed input file, in input order.
#[derive(Debug, Clone)]
pub struct CompressedFile {
    /// Both compression stages applied, ready to split.
    pub data: Vec<u8>,
    /// Size of the original bytes.
    pub original_size: u64,
    /// Hex SHA-256 over the original bytes.
    pub checksum: String,
}

/// Apply both stages to a stream, reading the source in bounded chunks.
///
/// The writer chain is source → LZ4 encoder → Zstd encoder → output buffer,
/// so a multi-gigabyte input is never held in memory; only the compressed
/// result is.
pub fn compress_stream<R: Read>(src: &mut R, id: CompressionId) -> Result<Vec<u8>> {
    match id {
        CompressionId::Lz4Zstd => {
            let zstd_enc = zstd::stream::write::Encoder::new(Vec::new(), RATIO_STAGE_LEVEL)
                .map_err(|e| ArchiveError::CompressionFailed(e.to_string()))?;
            let mut lz4_enc = lz4_flex::frame::FrameEncoder::new(zstd_enc);
            std::io::copy(src, &mut lz4_enc)
                .map_err(|e| ArchiveError::CompressionFailed(e.to_string()))?;
            let zstd_enc = lz4_enc
                .finish()
                .map_err(|e| ArchiveError::CompressionFailed(e.to_string()))?;
            zstd_enc
                .finish()
                .map_err(|e| ArchiveError::CompressionFailed(e.to_string()))
        }
    }
}

/// Reverse the stages in exact inverse order (Zstd decode, then LZ4 decode),
/// writing the original bytes to `dst`. Returns the decompressed byte count.
pub fn decompress_stream<W: Write>(
    compressed: &[u8],
    id: CompressionId,
    dst: &mut W,
) -> Result<u64> {
    match id {
        CompressionId::Lz4Zstd => {
            let zstd_dec = zstd::stream::read::Decoder::new(compressed)
                .map_err(|e| ArchiveError::DecompressionFailed(e.to_string()))?;
            let mut lz4_dec = lz4_flex::frame::FrameDecoder::new(zstd_dec);
            std::io::copy(&mut lz4_dec, dst)
                .map_err(|e| ArchiveError::DecompressionFailed(e.to_string()))
        }
    }
}

/// Decompress into a fresh buffer sized from the declared original size.
pub fn decompress_to_vec(compressed: &[u8], id: CompressionId, size_hint: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint.min(1 << 30) as usize);
    decompress_stream(compressed, id, &mut out)?;
    Ok(out)
}

/// Compress one input file, digesting the original bytes in the same pass.
///
/// Unreadable files surface as recoverable `InputFile` errors so the caller
/// can continue with the rest of the batch.
pub fn compress_file(path: &Path, id: CompressionId) -> Result<CompressedFile> {
    let file = File::open(path).map_err(|e| ArchiveError::InputFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut reader = HashingReader::new(BufReader::new(file));
    let data = compress_stream(&mut reader, id).map_err(|e| match e {
        // read-side failures mid-stream are still input errors for this file
        ArchiveError::CompressionFailed(reason) => ArchiveError::InputFile {
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })?;
    let original_size = reader.bytes_read();
    let checksum = reader.finalize_hex();
    Ok(CompressedFile {
        data,
        original_size,
        checksum,
    })
}
