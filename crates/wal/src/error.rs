//! WAL-local error type.

use thiserror::Error;

/// Failures specific to the write-ahead log.
///
/// Converted into [`velox_core::VeloxError`] at the transaction manager
/// boundary, so every caller outside this crate sees one unified error
/// type.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying file I/O failed.
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record's stored CRC did not match its computed CRC.
    #[error("WAL record checksum mismatch (segment {segment}, offset {offset})")]
    ChecksumMismatch {
        /// Segment the bad record was found in.
        segment: u64,
        /// Byte offset of the bad record within the segment.
        offset: u64,
    },

    /// A segment's header failed validation (bad magic or unreadable).
    #[error("invalid WAL segment header in segment {0}")]
    InvalidSegmentHeader(u64),

    /// A record's length prefix claimed more bytes than remain in the file
    /// — the segment was torn off mid-write.
    #[error("truncated record in segment {segment} at offset {offset}")]
    TornWrite {
        /// Segment containing the truncated record.
        segment: u64,
        /// Byte offset where the truncated record starts.
        offset: u64,
    },

    /// MessagePack encode/decode of a log record's payload failed.
    #[error("WAL record encoding error: {0}")]
    Encoding(String),
}

impl WalError {
    /// True if a scan should stop at this record (treat the remainder of
    /// the WAL as discardable torn-write) rather than propagate as fatal.
    pub fn is_recoverable_as_torn_write(&self) -> bool {
        matches!(
            self,
            WalError::ChecksumMismatch { .. } | WalError::TornWrite { .. }
        )
    }
}

/// Result alias for WAL operations.
pub type WalResult<T> = std::result::Result<T, WalError>;
