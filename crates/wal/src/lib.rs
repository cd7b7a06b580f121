//! Segmented write-ahead log for VeloxDB.
//!
//! [`writer::WalWriter`] appends and flushes; [`reader::recover`] replays a
//! WAL directory on startup. Segment/record layout lives in [`format`].
//! [`sink::ReplicationSink`] is the seam the commit pipeline uses to
//! synchronously replicate a batch, implemented by `velox-replication`.

#![warn(missing_docs)]

pub mod error;
pub mod format;
pub mod reader;
pub mod segment;
pub mod sink;
pub mod writer;

pub use error::{WalError, WalResult};
pub use format::{LogRecord, MutationEntry, SegmentHeader};
pub use reader::{latest_segment_number, read_from, recover, truncate_before, RecoveryResult};
pub use segment::Segment;
pub use sink::ReplicationSink;
pub use writer::WalWriter;
