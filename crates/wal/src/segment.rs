//! A single WAL segment file.

use crate::error::{WalError, WalResult};
use crate::format::{SegmentHeader, SEGMENT_HEADER_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File handle for one WAL segment. Only the active segment is writable.
pub struct Segment {
    file: File,
    segment_number: u64,
    write_position: u64,
    path: PathBuf,
}

impl Segment {
    /// Conventional file name for a segment number.
    pub fn file_name(segment_number: u64) -> String {
        format!("wal-{:010}.seg", segment_number)
    }

    /// Create a brand-new segment file and write its header.
    pub fn create(dir: &Path, segment_number: u64, database_id: [u8; 16]) -> WalResult<Self> {
        let path = dir.join(Self::file_name(segment_number));
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .read(true)
            .open(&path)?;
        let header = SegmentHeader::new(segment_number, database_id);
        file.write_all(&header.to_bytes())?;
        Ok(Self {
            file,
            segment_number,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
        })
    }

    /// Open an existing segment for appending, seeking to its current end.
    pub fn open_append(dir: &Path, segment_number: u64) -> WalResult<Self> {
        let path = dir.join(Self::file_name(segment_number));
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let header = Self::read_and_validate_header(&mut file, segment_number)?;
        let write_position = file.seek(SeekFrom::End(0))?;
        let _ = header;
        Ok(Self {
            file,
            segment_number,
            write_position,
            path,
        })
    }

    /// Open an existing segment read-only, for recovery scans.
    pub fn open_read(dir: &Path, segment_number: u64) -> WalResult<Self> {
        let path = dir.join(Self::file_name(segment_number));
        let mut file = OpenOptions::new().read(true).open(&path)?;
        Self::read_and_validate_header(&mut file, segment_number)?;
        let write_position = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            segment_number,
            write_position,
            path,
        })
    }

    fn read_and_validate_header(file: &mut File, expected: u64) -> WalResult<SegmentHeader> {
        file.seek(SeekFrom::Start(0))?;
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = SegmentHeader::from_bytes(&header_bytes)
            .ok_or(WalError::InvalidSegmentHeader(expected))?;
        if !header.is_valid() || header.segment_number != expected {
            return Err(WalError::InvalidSegmentHeader(expected));
        }
        Ok(header)
    }

    /// This segment's number.
    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    /// Current size of the segment in bytes, including the header.
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Path to the segment file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `data` at the current write position.
    pub fn append(&mut self, data: &[u8]) -> WalResult<u64> {
        let offset = self.write_position;
        self.file.write_all(data)?;
        self.write_position += data.len() as u64;
        Ok(offset)
    }

    /// Force the segment's bytes to stable storage.
    pub fn sync(&mut self) -> WalResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Discard everything from `position` onward (used during recovery to
    /// drop a torn trailing record).
    pub fn truncate(&mut self, position: u64) -> WalResult<()> {
        self.file.set_len(position)?;
        self.write_position = position;
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    /// Read the full contents of the segment after the header, for a
    /// recovery scan.
    pub fn read_body(&mut self) -> WalResult<Vec<u8>> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_append_then_reopen_preserves_body() {
        let dir = tempdir().unwrap();
        {
            let mut seg = Segment::create(dir.path(), 1, [1u8; 16]).unwrap();
            seg.append(b"hello").unwrap();
            seg.sync().unwrap();
        }
        let mut seg = Segment::open_append(dir.path(), 1).unwrap();
        assert_eq!(seg.read_body().unwrap(), b"hello");
    }

    #[test]
    fn open_append_rejects_mismatched_segment_number() {
        let dir = tempdir().unwrap();
        Segment::create(dir.path(), 1, [1u8; 16]).unwrap();
        let err = Segment::open_append(dir.path(), 2);
        assert!(err.is_err());
    }

    #[test]
    fn truncate_drops_trailing_bytes() {
        let dir = tempdir().unwrap();
        let mut seg = Segment::create(dir.path(), 1, [1u8; 16]).unwrap();
        let offset = seg.append(b"hello-world").unwrap();
        seg.truncate(offset + 5).unwrap();
        assert_eq!(seg.read_body().unwrap(), b"hello");
    }
}
