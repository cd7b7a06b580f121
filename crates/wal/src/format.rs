//! On-disk segment and record layout.
//!
//! A fixed 32-byte segment header followed by length-prefixed,
//! CRC32-checked records. `LogRecord` payloads are encoded with
//! `rmp-serde` rather than a hand-rolled byte layout, since the payload
//! here is a variable-shaped mutation list rather than a flat key/value
//! writeset.

use crate::error::{WalError, WalResult};
use serde::{Deserialize, Serialize};
use velox_core::{ClassId, Csn, ObjectId, ObjectVersion};

/// Magic bytes identifying a VeloxDB WAL segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"VLOG";

/// Current segment format version.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of the segment header in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// Header written at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// `SEGMENT_MAGIC`.
    pub magic: [u8; 4],
    /// Format version, for forward compatibility.
    pub format_version: u32,
    /// Segment number (monotonically increasing, matches the file name).
    pub segment_number: u64,
    /// Database identity, to detect a segment directory mixed across instances.
    pub database_id: [u8; 16],
}

impl SegmentHeader {
    /// Build a header for a brand-new segment.
    pub fn new(segment_number: u64, database_id: [u8; 16]) -> Self {
        Self {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            segment_number,
            database_id,
        }
    }

    /// Encode to the fixed 32-byte on-disk representation.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.segment_number.to_le_bytes());
        bytes[16..32].copy_from_slice(&self.database_id);
        bytes
    }

    /// Decode from the fixed 32-byte on-disk representation.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Option<Self> {
        Some(Self {
            magic: bytes[0..4].try_into().ok()?,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            segment_number: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            database_id: bytes[16..32].try_into().ok()?,
        })
    }

    /// Whether this header has the expected magic bytes.
    pub fn is_valid(&self) -> bool {
        self.magic == SEGMENT_MAGIC
    }
}

/// One mutation inside a committed transaction's write-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationEntry {
    /// A new object was created.
    Created {
        /// Newly allocated id.
        object_id: ObjectId,
        /// Class the object belongs to.
        class_id: ClassId,
        /// Its first version.
        version: ObjectVersion,
    },
    /// An existing object received a new version.
    Updated {
        /// Object that was updated.
        object_id: ObjectId,
        /// The new version.
        version: ObjectVersion,
    },
    /// An object was tombstoned.
    Deleted {
        /// Object that was deleted.
        object_id: ObjectId,
    },
}

impl MutationEntry {
    /// The object this mutation applies to.
    pub fn object_id(&self) -> ObjectId {
        match self {
            MutationEntry::Created { object_id, .. } => *object_id,
            MutationEntry::Updated { object_id, .. } => *object_id,
            MutationEntry::Deleted { object_id } => *object_id,
        }
    }
}

/// The payload carried by a single WAL record: one committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// CSN this record was committed at.
    pub csn: Csn,
    /// Schema version in effect when the record was written, used to guard
    /// replay against a schema upgrade that changed property layouts.
    pub schema_version: u32,
    /// Ordered mutations that make up this transaction's write-set.
    pub mutations: Vec<MutationEntry>,
}

impl LogRecord {
    /// Encode the record body (without length prefix or CRC) to bytes.
    fn encode_payload(&self) -> WalResult<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| WalError::Encoding(e.to_string()))
    }

    /// Serialize to the on-disk record format: `length(4) | payload | crc32(4)`.
    pub fn to_bytes(&self) -> WalResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let crc = crc32fast::hash(&payload);
        let total_len = payload.len() + 4;
        let mut out = Vec::with_capacity(4 + total_len);
        out.extend_from_slice(&(total_len as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    /// Decode one record from the front of `bytes`, returning the record and
    /// the number of bytes consumed.
    ///
    /// Returns `Ok(None)` if `bytes` does not yet contain a full record
    /// (used by the reader to detect a torn trailing write rather than an
    /// error worth reporting loudly).
    pub fn from_bytes(bytes: &[u8]) -> WalResult<Option<(Self, usize)>> {
        if bytes.len() < 4 {
            return Ok(None);
        }
        let total_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if bytes.len() < 4 + total_len {
            return Ok(None);
        }
        if total_len < 4 {
            return Err(WalError::Encoding("record shorter than CRC field".into()));
        }
        let body = &bytes[4..4 + total_len];
        let (payload, crc_bytes) = body.split_at(total_len - 4);
        let stored_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        let computed_crc = crc32fast::hash(payload);
        if stored_crc != computed_crc {
            return Err(WalError::ChecksumMismatch {
                segment: 0,
                offset: 0,
            });
        }
        let record: LogRecord =
            rmp_serde::from_slice(payload).map_err(|e| WalError::Encoding(e.to_string()))?;
        Ok(Some((record, 4 + total_len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use velox_core::ObjectVersion;

    fn sample_record() -> LogRecord {
        LogRecord {
            csn: Csn(7),
            schema_version: 1,
            mutations: vec![MutationEntry::Created {
                object_id: ObjectId(1),
                class_id: ClassId(1),
                version: ObjectVersion {
                    class_id: ClassId(1),
                    properties: HashMap::new(),
                    references: HashMap::new(),
                    create_csn: Csn(7),
                    tombstone_csn: None,
                },
            }],
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let record = sample_record();
        let bytes = record.to_bytes().unwrap();
        let (decoded, consumed) = LogRecord::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn detects_bit_flip_as_checksum_mismatch() {
        let record = sample_record();
        let mut bytes = record.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            LogRecord::from_bytes(&bytes),
            Err(WalError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn incomplete_trailing_bytes_return_none_not_error() {
        let record = sample_record();
        let bytes = record.to_bytes().unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(LogRecord::from_bytes(truncated).unwrap().is_none());
    }

    #[test]
    fn segment_header_round_trips() {
        let header = SegmentHeader::new(3, [9u8; 16]);
        let bytes = header.to_bytes();
        let decoded = SegmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, decoded);
        assert!(decoded.is_valid());
    }
}
