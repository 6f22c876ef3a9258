//! Local/cloud splitting of compressed byte streams.
//!
//! A compressed stream is cut once: the leading `local_percent` of its bytes
//! stay on the client inside the `.wca` container, the remainder goes to
//! remote storage. Concatenating the two parts reproduces the stream exactly.
//! The ratio is applied per file so every file record's ranges are
//! self-consistent slices of that file's own compressed bytes.

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};

/// Percentage division between local and cloud fragments. The two parts
/// always sum to 100. Serializes as the bare local percentage; values over
/// 100 are rejected on deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SplitRatio {
    local_percent: u8,
}

impl TryFrom<u8> for SplitRatio {
    type Error = ArchiveError;
    fn try_from(local_percent: u8) -> Result<Self> {
        Self::new(local_percent)
    }
}

impl From<SplitRatio> for u8 {
    fn from(ratio: SplitRatio) -> u8 {
        ratio.local_percent
    }
}

impl SplitRatio {
    /// Validated constructor; `local_percent` must be 0..=100.
    pub fn new(local_percent: u8) -> Result<Self> {
        if local_percent > 100 {
            return Err(ArchiveError::InvalidRatio { local_percent });
        }
        Ok(Self { local_percent })
    }

    /// Percentage kept on the client.
    pub fn local_percent(&self) -> u8 {
        self.local_percent
    }

    /// Percentage destined for remote storage.
    pub fn cloud_percent(&self) -> u8 {
        100 - self.local_percent
    }

    /// Split point for a stream of `len` bytes: `floor(len * local / 100)`.
    pub fn split_point(&self, len: u64) -> u64 {
        ((len as u128 * self.local_percent as u128) / 100) as u64
    }
}

impl Default for SplitRatio {
    /// The documented default: 10% local, 90% cloud.
    fn default() -> Self {
        Self { local_percent: 10 }
    }
}

/// Split a compressed stream into (local, cloud) slices.
///
/// Streams shorter than `keep_local_below` stay entirely local so that small
/// archives remain self-contained and extractable without network access.
pub fn split<'a>(data: &'a [u8], ratio: SplitRatio, keep_local_below: u64) -> (&'a [u8], &'a [u8]) {
    if (data.len() as u64) < keep_local_below {
        return (data, &[]);
    }
    let s = ratio.split_point(data.len() as u64) as usize;
    data.split_at(s)
}

/// Reassemble a compressed stream from its two parts.
pub fn merge(local: &[u8], cloud: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(local.len() + cloud.len());
    out.extend_from_slice(local);
    out.extend_from_slice(cloud);
    out
}
