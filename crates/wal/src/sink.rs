//! The seam the commit pipeline uses to synchronously replicate a batch
//! before acknowledging commit.
//!
//! Defined here rather than in `velox-replication` so `velox-txn` can call
//! it without depending on the replication crate's connection machinery —
//! the same layering reason `velox-core` hosts `ObjectStore` rather than
//! `velox-storage`.

use crate::format::LogRecord;
use velox_core::{Lsn, VeloxResult};

/// Ships one committed batch to every configured standby and blocks until
/// the synchronous-commit policy is satisfied: every `Sync` standby has
/// acknowledged, or the configured ack timeout degraded it to `Failing`.
///
/// Implemented by `velox_replication::PrimaryReplicator`. A [`TransactionManager`](../../velox_txn/struct.TransactionManager.html)
/// with no sink configured behaves as an unreplicated, standalone engine.
pub trait ReplicationSink: Send + Sync {
    /// `start_lsn` is the LSN the first of `records` was written at.
    fn ship(&self, start_lsn: Lsn, records: &[LogRecord]) -> VeloxResult<()>;
}
