//! The `.wca`/`.cloud` container format.
//!
//! Layout: `MAGIC "WCLOUD10" (8) | META_LEN (4, LE u32) | META (UTF-8 JSON)
//! | LOCAL_DATA`. The metadata block is a strongly-typed record; unknown
//! required-field absence is a parse error, and a truncated file is always
//! rejected as corruption rather than silently short-read.

use crate::compression::CompressionId;
use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Magic header: format name plus version digits.
pub const MAGIC: [u8; 8] = *b"WCLOUD10";
/// Metadata schema version.
pub const FORMAT_VERSION: &str = "1.0";

const HEADER_LEN: u64 = MAGIC.len() as u64 + 4;

/// One entry per original input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Original file name (final path component).
    pub name: String,
    /// Original full path, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Original (uncompressed) size in bytes.
    pub size: u64,
    /// Compressed size in bytes (both stages applied).
    pub compressed_size: u64,
    /// Offset of this file's local part within the local fragment.
    pub local_offset: u64,
    /// Length of this file's local part.
    pub local_size: u64,
    /// Offset of this file's cloud part within the cloud fragment.
    pub cloud_offset: u64,
    /// Length of this file's cloud part.
    pub cloud_size: u64,
    /// Hex SHA-256 over the original bytes.
    pub checksum: String,
    /// Server-side file identifier, absent until (and unless) uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,
}

/// Archive metadata block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    /// Format version string.
    pub version: String,
    /// Creation time, unix seconds.
    pub created: f64,
    /// Total original size of all archived files.
    pub total_size: u64,
    /// Stage combination applied to every file.
    pub compression: CompressionId,
    /// Remote handle for the cloud fragment; absent for fully-local archives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_archive_id: Option<String>,
    /// File records, in input order.
    pub files: Vec<FileRecord>,
}

impl ArchiveMeta {
    /// Sum of the declared local parts; must equal the local fragment length.
    pub fn local_fragment_len(&self) -> u64 {
        self.files.iter().map(|f| f.local_size).sum()
    }

    /// Sum of the declared cloud parts.
    pub fn cloud_fragment_len(&self) -> u64 {
        self.files.iter().map(|f| f.cloud_size).sum()
    }
}

/// A parsed archive: metadata plus the raw local fragment bytes.
#[derive(Debug, Clone)]
pub struct Archive {
    /// The metadata block.
    pub meta: ArchiveMeta,
    /// The local fragment.
    pub local_data: Vec<u8>,
}

/// Serialize an archive to a writer. The caller owns temp-file staging.
pub fn write_archive<W: Write>(w: &mut W, meta: &ArchiveMeta, local_data: &[u8]) -> Result<()> {
    debug_assert_eq!(meta.local_fragment_len(), local_data.len() as u64);
    let meta_json =
        serde_json::to_vec(meta).map_err(|e| ArchiveError::MetadataEncode(e.to_string()))?;
    let meta_len = u32::try_from(meta_json.len()).map_err(|_| ArchiveError::MetadataTooLarge {
        size: meta_json.len(),
    })?;
    w.write_all(&MAGIC)?;
    w.write_all(&meta_len.to_le_bytes())?;
    w.write_all(&meta_json)?;
    w.write_all(local_data)?;
    Ok(())
}

/// Parse an archive from a full byte image, validating magic, metadata, and
/// fragment length before anything is returned.
pub fn parse_archive(bytes: &[u8]) -> Result<Archive> {
    if bytes.len() < MAGIC.len() {
        return Err(ArchiveError::Truncated {
            region: "magic",
            needed: MAGIC.len() as u64,
            available: bytes.len() as u64,
        });
    }
    if bytes[..MAGIC.len()] != MAGIC {
        return Err(ArchiveError::InvalidMagic);
    }
    if (bytes.len() as u64) < HEADER_LEN {
        return Err(ArchiveError::Truncated {
            region: "metadata length",
            needed: HEADER_LEN,
            available: bytes.len() as u64,
        });
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[MAGIC.len()..MAGIC.len() + 4]);
    let meta_len = u32::from_le_bytes(len_bytes) as u64;

    let meta_end = HEADER_LEN + meta_len;
    if (bytes.len() as u64) < meta_end {
        return Err(ArchiveError::Truncated {
            region: "metadata",
            needed: meta_len,
            available: bytes.len() as u64 - HEADER_LEN,
        });
    }
    let meta: ArchiveMeta = serde_json::from_slice(&bytes[HEADER_LEN as usize..meta_end as usize])
        .map_err(|e| ArchiveError::MalformedMetadata(e.to_string()))?;

    let local_data = bytes[meta_end as usize..].to_vec();
    let declared = meta.local_fragment_len();
    if declared != local_data.len() as u64 {
        if declared > local_data.len() as u64 {
            return Err(ArchiveError::Truncated {
                region: "local fragment",
                needed: declared,
                available: local_data.len() as u64,
            });
        }
        return Err(ArchiveError::FragmentLengthMismatch {
            declared,
            actual: local_data.len() as u64,
        });
    }
    if meta.cloud_archive_id.is_none() && meta.cloud_fragment_len() > 0 {
        return Err(ArchiveError::CloudFragmentMissing);
    }
    Ok(Archive { meta, local_data })
}

/// Read and parse an archive file.
pub fn read_archive(path: &Path) -> Result<Archive> {
    let bytes = std::fs::read(path)?;
    parse_archive(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> ArchiveMeta {
        ArchiveMeta {
            version: FORMAT_VERSION.to_string(),
            created: 1_725_000_000.5,
            total_size: 40,
            compression: CompressionId::Lz4Zstd,
            cloud_archive_id: Some("a1b2".to_string()),
            files: vec![FileRecord {
                name: "report.txt".to_string(),
                path: Some("/home/user/report.txt".to_string()),
                size: 40,
                compressed_size: 30,
                local_offset: 0,
                local_size: 3,
                cloud_offset: 0,
                cloud_size: 27,
                checksum: "00ff".to_string(),
                cloud_id: Some("f-1".to_string()),
            }],
        }
    }

    fn serialize(meta: &ArchiveMeta, local: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_archive(&mut out, meta, local).unwrap();
        out
    }

    #[test]
    fn roundtrip_preserves_every_field() {
        let meta = sample_meta();
        let bytes = serialize(&meta, b"abc");
        let archive = parse_archive(&bytes).unwrap();
        assert_eq!(archive.meta, meta);
        assert_eq!(archive.local_data, b"abc");
    }

    #[test]
    fn fully_local_archive_omits_cloud_id() {
        let mut meta = sample_meta();
        meta.cloud_archive_id = None;
        meta.files[0].cloud_id = None;
        meta.files[0].cloud_size = 0;
        meta.files[0].local_size = 3;
        let bytes = serialize(&meta, b"abc");
        let json = std::str::from_utf8(&bytes[12..bytes.len() - 3]).unwrap();
        assert!(!json.contains("cloud_archive_id"));
        assert!(parse_archive(&bytes).unwrap().meta.cloud_archive_id.is_none());
    }

    #[test]
    fn bad_magic_is_rejected_first() {
        let mut bytes = serialize(&sample_meta(), b"abc");
        bytes[0] = b'X';
        assert!(matches!(parse_archive(&bytes), Err(ArchiveError::InvalidMagic)));
    }

    #[test]
    fn every_truncation_point_is_a_format_error() {
        let bytes = serialize(&sample_meta(), b"abc");
        for cut in [0, 4, 8, 10, 12, 20, bytes.len() - 1] {
            let err = parse_archive(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(
                    err,
                    ArchiveError::Truncated { .. }
                        | ArchiveError::InvalidMagic
                        | ArchiveError::MalformedMetadata(_)
                ),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn malformed_json_never_partially_populates() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(b"{nope!}");
        assert!(matches!(
            parse_archive(&bytes),
            Err(ArchiveError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        let json = br#"{"version":"1.0","created":0.0,"files":[]}"#;
        bytes.extend_from_slice(&(json.len() as u32).to_le_bytes());
        bytes.extend_from_slice(json);
        assert!(matches!(
            parse_archive(&bytes),
            Err(ArchiveError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn oversized_fragment_is_a_length_mismatch() {
        let bytes = serialize(&sample_meta(), b"abc");
        let mut longer = bytes.clone();
        longer.extend_from_slice(b"zz");
        assert!(matches!(
            parse_archive(&longer),
            Err(ArchiveError::FragmentLengthMismatch { declared: 3, actual: 5 })
        ));
    }

    #[test]
    fn cloud_ranges_without_cloud_id_are_rejected() {
        let mut meta = sample_meta();
        meta.cloud_archive_id = None;
        let bytes = serialize(&meta, b"abc");
        assert!(matches!(
            parse_archive(&bytes),
            Err(ArchiveError::CloudFragmentMissing)
        ));
    }

    #[test]
    fn empty_archive_is_valid() {
        let meta = ArchiveMeta {
            version: FORMAT_VERSION.to_string(),
            created: 0.0,
            total_size: 0,
            compression: CompressionId::Lz4Zstd,
            cloud_archive_id: None,
            files: Vec::new(),
        };
        let bytes = serialize(&meta, b"");
        let archive = parse_archive(&bytes).unwrap();
        assert!(archive.meta.files.is_empty());
        assert!(archive.local_data.is_empty());
    }
}
