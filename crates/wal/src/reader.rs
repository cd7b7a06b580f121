//! WAL directory scanning and crash-recovery replay.

use crate::error::WalResult;
use crate::format::LogRecord;
use crate::segment::Segment;
use std::path::Path;
use tracing::{info, warn};
use velox_core::Lsn;

/// Parse `wal-NNNNNNNNNN.seg` file names to find the highest segment number
/// present in `dir`, or `None` if the directory has no segments yet.
pub fn latest_segment_number(dir: &Path) -> WalResult<Option<u64>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut max = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stripped) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".seg")) {
            if let Ok(number) = stripped.parse::<u64>() {
                max = Some(max.map_or(number, |m: u64| m.max(number)));
            }
        }
    }
    Ok(max)
}

/// Result of a full recovery scan: the records to replay, in CSN order,
/// and whether a torn write was found and discarded at the tail.
pub struct RecoveryResult {
    /// Records successfully validated and ready to replay, in file order.
    pub records: Vec<LogRecord>,
    /// True if replay stopped early because a record failed its checksum
    /// or was truncated mid-write.
    pub torn_write_discarded: bool,
}

/// Scan every segment in `dir` in ascending segment-number order, replaying
/// records until the end of the log or the first corrupt/torn record.
///
/// On finding a bad record, truncates the segment file at that record's
/// start offset — any suffix past it is a torn write — and stops scanning
/// further segments.
pub fn recover(dir: &Path) -> WalResult<RecoveryResult> {
    let mut records = Vec::new();
    let mut torn_write_discarded = false;

    if !dir.exists() {
        return Ok(RecoveryResult {
            records,
            torn_write_discarded,
        });
    }

    let mut segment_numbers = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stripped) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".seg")) {
            if let Ok(number) = stripped.parse::<u64>() {
                segment_numbers.push(number);
            }
        }
    }
    segment_numbers.sort_unstable();

    'segments: for number in segment_numbers {
        let mut segment = Segment::open_append(dir, number)?;
        let body = segment.read_body()?;
        let mut cursor = 0usize;
        loop {
            if cursor >= body.len() {
                break;
            }
            match LogRecord::from_bytes(&body[cursor..]) {
                Ok(Some((record, consumed))) => {
                    records.push(record);
                    cursor += consumed;
                }
                Ok(None) => {
                    warn!(segment = number, offset = cursor, "discarding torn trailing write");
                    segment.truncate(crate::format::SEGMENT_HEADER_SIZE as u64 + cursor as u64)?;
                    torn_write_discarded = true;
                    break 'segments;
                }
                Err(e) => {
                    warn!(segment = number, offset = cursor, error = %e, "discarding corrupt record");
                    segment.truncate(crate::format::SEGMENT_HEADER_SIZE as u64 + cursor as u64)?;
                    torn_write_discarded = true;
                    break 'segments;
                }
            }
        }
    }

    info!(replayed = records.len(), torn_write_discarded, "WAL recovery scan complete");
    Ok(RecoveryResult {
        records,
        torn_write_discarded,
    })
}

/// Read every record at or after `from`, across however many segments hold
/// them, so a primary can serve a standby resync in place instead of
/// forcing a full reseed.
pub fn read_from(dir: &Path, from: Lsn) -> WalResult<Vec<LogRecord>> {
    let mut records = Vec::new();
    if !dir.exists() {
        return Ok(records);
    }

    let mut segment_numbers = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stripped) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".seg")) {
            if let Ok(number) = stripped.parse::<u64>() {
                if number >= from.segment {
                    segment_numbers.push(number);
                }
            }
        }
    }
    segment_numbers.sort_unstable();

    for number in segment_numbers {
        let mut segment = Segment::open_read(dir, number)?;
        let body = segment.read_body()?;
        let mut cursor = 0usize;
        loop {
            if cursor >= body.len() {
                break;
            }
            let record_offset = crate::format::SEGMENT_HEADER_SIZE as u64 + cursor as u64;
            match LogRecord::from_bytes(&body[cursor..]) {
                Ok(Some((record, consumed))) => {
                    if number > from.segment || record_offset >= from.offset {
                        records.push(record);
                    }
                    cursor += consumed;
                }
                Ok(None) | Err(_) => break,
            }
        }
    }
    Ok(records)
}

/// Reclaim whole segment files strictly before `lsn.segment`. The segment
/// containing `lsn`, and every later one, is left alone since a standby
/// might still resync from a position inside it.
pub fn truncate_before(dir: &Path, lsn: Lsn) -> WalResult<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stripped) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".seg")) {
            if let Ok(number) = stripped.parse::<u64>() {
                if number < lsn.segment {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
    }
    Ok(())
}
