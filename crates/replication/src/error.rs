//! Replication-local error taxonomy.

use velox_core::{Lsn, VeloxError};

/// Failures specific to the replication wire protocol and peer bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// Underlying transport failure.
    #[error("replication transport error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame failed to decode.
    #[error("replication frame encoding error: {0}")]
    Encoding(String),

    /// A standby received a `LogBatch` whose `startLSN` does not follow its
    /// last applied LSN.
    #[error("replication gap: expected to continue at {expected}, batch starts at {got}")]
    Gap {
        /// LSN the standby expected next.
        expected: Lsn,
        /// LSN the batch actually started at.
        got: Lsn,
    },

    /// The primary could not satisfy a resync request because the requested
    /// LSN has already been truncated or rotated out.
    #[error("standby has diverged and requires a full snapshot reseed")]
    Divergent,

    /// A `Sync` peer did not acknowledge within its configured deadline.
    #[error("replication timeout waiting on standby {node_name}")]
    Timeout {
        /// The peer that missed its deadline.
        node_name: String,
    },

    /// A `RoleChange` was rejected because it violated the succession rule.
    #[error("invalid role transition: {0}")]
    InvalidTransition(String),
}

impl From<ReplicationError> for VeloxError {
    fn from(err: ReplicationError) -> Self {
        match err {
            ReplicationError::Timeout { node_name } => VeloxError::replication_timeout(node_name),
            ReplicationError::Divergent => {
                VeloxError::StorageCorruption("standby diverged from primary".into())
            }
            ReplicationError::Gap { .. } | ReplicationError::InvalidTransition(_) => {
                VeloxError::IntegrityError(err.to_string())
            }
            ReplicationError::Io(e) => VeloxError::Io(e),
            ReplicationError::Encoding(msg) => VeloxError::Serialization(msg),
        }
    }
}

/// Result alias for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;
