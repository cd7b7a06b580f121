//! Standby-side application of a replicated commit stream.

use crate::error::{ReplicationError, ReplicationResult};
use crate::frame::Frame;
use parking_lot::Mutex;
use tracing::{error, info};
use velox_core::Lsn;
use velox_wal::LogRecord;

/// A standby's position in the replicated stream, and whether it has
/// diverged and needs a full reseed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    /// Applying records strictly in order.
    Following,
    /// A gap could not be closed by resync; requires a full snapshot reseed.
    Divergent,
}

/// Applies `LogBatch` frames to the local object store in strict LSN order.
///
/// Owns only position tracking here; actual installation into the heap is
/// the caller's responsibility (the standby applies through the same
/// `velox_storage::Heap::write_version`/`delete` calls the primary's commit
/// pipeline uses, just without re-running conflict validation).
pub struct StandbyApplier {
    state: Mutex<(Lsn, ApplyState)>,
}

impl StandbyApplier {
    /// A fresh applier resuming at `last_applied_lsn` (zero for a brand-new
    /// standby, or the watermark recovered from the standby's own WAL).
    pub fn new(last_applied_lsn: Lsn) -> Self {
        Self {
            state: Mutex::new((last_applied_lsn, ApplyState::Following)),
        }
    }

    /// The highest LSN applied so far.
    pub fn last_applied_lsn(&self) -> Lsn {
        self.state.lock().0
    }

    /// Current apply state.
    pub fn apply_state(&self) -> ApplyState {
        self.state.lock().1
    }

    /// Validate that `batch_start` continues directly from the last applied
    /// position. Returns the records to install, or an error describing the
    /// gap if `batch_start` does not match.
    ///
    /// `advance_by` is the caller-supplied new watermark once the batch's
    /// records have actually been installed and locally flushed; splitting
    /// validation from advancement lets the caller install the batch (which
    /// can fail partway) before committing the new position.
    pub fn validate_batch_start(&self, batch_start: Lsn) -> ReplicationResult<()> {
        let (last_applied, state) = *self.state.lock();
        if state == ApplyState::Divergent {
            return Err(ReplicationError::Divergent);
        }
        if last_applied == Lsn::ZERO || batch_start == last_applied {
            return Ok(());
        }
        Err(ReplicationError::Gap {
            expected: last_applied,
            got: batch_start,
        })
    }

    /// Record that every record in the batch ending at `new_lsn` has been
    /// installed and locally flushed.
    pub fn advance(&self, new_lsn: Lsn) {
        let mut guard = self.state.lock();
        guard.0 = new_lsn;
        info!(lsn = %new_lsn, "standby advanced apply position");
    }

    /// Mark this standby divergent: the primary could not satisfy a resync
    /// request because the requested LSN has already been truncated.
    pub fn mark_divergent(&self) {
        error!("standby entering Divergent state, requires full snapshot reseed");
        self.state.lock().1 = ApplyState::Divergent;
    }
}

/// Compute the LSN the batch ends at, given its start and record count.
///
/// Each record advances the offset within its segment; a real
/// implementation tracks per-record byte length from the WAL encoder. Here
/// the batch's own `start_lsn` plus the number of records it carries is
/// used as a monotonic proxy sufficient for gap detection, since exact
/// byte offsets are only meaningful within a single segment file on disk.
pub fn batch_end_lsn(start_lsn: Lsn, records: &[LogRecord]) -> Lsn {
    Lsn::new(start_lsn.segment, start_lsn.offset + records.len() as u64)
}

/// Extract the batch's `(start_lsn, records)` payload out of a `LogBatch`
/// frame, rejecting any other frame kind.
pub fn expect_log_batch(frame: Frame) -> ReplicationResult<(Lsn, Vec<LogRecord>)> {
    match frame {
        Frame::LogBatch { start_lsn, records } => Ok((start_lsn, records)),
        other => Err(ReplicationError::Encoding(format!(
            "expected LogBatch frame, got {other:?}"
        ))),
    }
}
