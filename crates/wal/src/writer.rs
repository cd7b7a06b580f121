//! Append-only WAL writer with segment rotation.
//!
//! `flush_through` returns only once the OS has reported the target bytes
//! durable; group commit (handled one layer up, in `velox-txn`) amortizes
//! the resulting fsync cost across many transactions.

use crate::error::WalResult;
use crate::format::LogRecord;
use crate::segment::Segment;
use std::path::{Path, PathBuf};
use velox_core::Lsn;

/// Default segment size threshold before the writer rotates to a new file.
pub const DEFAULT_SEGMENT_SIZE_LIMIT: u64 = 64 * 1024 * 1024;

/// Appends [`LogRecord`]s to the active segment, rotating as segments fill.
pub struct WalWriter {
    dir: PathBuf,
    database_id: [u8; 16],
    segment: Segment,
    segment_size_limit: u64,
}

impl WalWriter {
    /// Open (or create) the WAL directory and resume writing at its tail.
    pub fn open(dir: impl AsRef<Path>, database_id: [u8; 16]) -> WalResult<Self> {
        Self::open_with_limit(dir, database_id, DEFAULT_SEGMENT_SIZE_LIMIT)
    }

    /// Same as [`WalWriter::open`] with an explicit rotation threshold,
    /// exposed for tests that want to exercise rotation without writing
    /// `DEFAULT_SEGMENT_SIZE_LIMIT` bytes.
    pub fn open_with_limit(
        dir: impl AsRef<Path>,
        database_id: [u8; 16],
        segment_size_limit: u64,
    ) -> WalResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let latest = crate::reader::latest_segment_number(&dir)?;
        let segment = match latest {
            Some(number) => match Segment::open_append(&dir, number) {
                Ok(seg) => seg,
                Err(_) => Segment::create(&dir, number + 1, database_id)?,
            },
            None => Segment::create(&dir, 1, database_id)?,
        };
        Ok(Self {
            dir,
            database_id,
            segment,
            segment_size_limit,
        })
    }

    fn rotate_if_needed(&mut self) -> WalResult<()> {
        if self.segment.size() >= self.segment_size_limit {
            self.segment.sync()?;
            let next = self.segment.segment_number() + 1;
            self.segment = Segment::create(&self.dir, next, self.database_id)?;
        }
        Ok(())
    }

    /// Append `record`, rotating segments first if the active one is full.
    ///
    /// Returns the LSN the record was written at. Does not fsync; call
    /// [`WalWriter::flush_through`] to make it durable.
    pub fn append(&mut self, record: &LogRecord) -> WalResult<Lsn> {
        self.rotate_if_needed()?;
        let bytes = record.to_bytes()?;
        let offset = self.segment.append(&bytes)?;
        Ok(Lsn::new(self.segment.segment_number(), offset))
    }

    /// Fsync the active segment so every record appended so far is durable.
    ///
    /// Group commit means one call here typically covers many prior
    /// `append` calls from a single batch.
    pub fn flush_through(&mut self, _lsn: Lsn) -> WalResult<()> {
        self.segment.sync()
    }

    /// The LSN the next `append` call would be written at.
    pub fn tail_lsn(&self) -> Lsn {
        Lsn::new(self.segment.segment_number(), self.segment.size())
    }

    /// Read every record at or after `from`, for a primary serving a
    /// standby resync or a tool replaying a range of history.
    pub fn read_from(&self, from: Lsn) -> WalResult<Vec<LogRecord>> {
        crate::reader::read_from(&self.dir, from)
    }

    /// Reclaim segment files entirely before `lsn`'s segment.
    ///
    /// The caller is responsible for only truncating before a position
    /// every synchronous standby, and the durability watermark, has
    /// already passed.
    pub fn truncate_before(&mut self, lsn: Lsn) -> WalResult<()> {
        crate::reader::truncate_before(&self.dir, lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use velox_core::Csn;

    fn record(csn: u64) -> LogRecord {
        LogRecord {
            csn: Csn(csn),
            schema_version: 1,
            mutations: Vec::new(),
        }
    }

    #[test]
    fn append_then_flush_advances_tail_lsn() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open(dir.path(), [1u8; 16]).unwrap();
        let before = writer.tail_lsn();
        let lsn = writer.append(&record(1)).unwrap();
        writer.flush_through(lsn).unwrap();
        assert!(writer.tail_lsn().offset > before.offset);
    }

    #[test]
    fn rotates_to_a_new_segment_once_the_limit_is_exceeded() {
        let dir = tempdir().unwrap();
        let mut writer = WalWriter::open_with_limit(dir.path(), [1u8; 16], 64).unwrap();
        let first_segment = writer.tail_lsn().segment;
        for i in 0..20 {
            writer.append(&record(i)).unwrap();
        }
        assert!(writer.tail_lsn().segment > first_segment);
    }

    #[test]
    fn resumes_appending_to_the_existing_tail_segment_on_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut writer = WalWriter::open(dir.path(), [1u8; 16]).unwrap();
            writer.append(&record(1)).unwrap();
            writer.flush_through(writer.tail_lsn()).unwrap();
        }
        let writer = WalWriter::open(dir.path(), [1u8; 16]).unwrap();
        assert_eq!(writer.tail_lsn().segment, 1);
        assert!(writer.tail_lsn().offset > 0);
    }
}
