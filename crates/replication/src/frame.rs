//! The primary/standby wire frames and their length-prefixed encoding.
//!
//! Encoded with `rmp-serde`, matching the WAL payload encoding (§3.N), and
//! framed the same way as [`velox_wal::format::LogRecord`]: a 4-byte
//! little-endian length prefix ahead of the MessagePack body. Unlike the WAL
//! record format there is no trailing CRC — frames travel over a reliable
//! TCP stream, not a file that can suffer a torn write.

use crate::error::{ReplicationError, ReplicationResult};
use crate::role::Role;
use serde::{Deserialize, Serialize};
use velox_core::Lsn;
use velox_wal::LogRecord;

/// One message in the primary/standby replication protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    /// Sent by a standby on connect, and periodically by a primary, to
    /// establish or confirm the peer's current epoch and apply position.
    Hello {
        /// The sender's advertised node name.
        node_name: String,
        /// The sender's current epoch.
        epoch: u64,
        /// The highest LSN the sender has durably applied.
        last_applied_lsn: Lsn,
    },
    /// A contiguous run of committed records, sent primary to standby.
    LogBatch {
        /// LSN of the first record in `records`.
        start_lsn: Lsn,
        /// Committed records, in commit order.
        records: Vec<LogRecord>,
    },
    /// Acknowledges durable application of every record up to and
    /// including `through_lsn`, sent standby to primary.
    Ack {
        /// Highest LSN applied and flushed by the sender.
        through_lsn: Lsn,
    },
    /// Periodic liveness probe, sent in both directions.
    Heartbeat {
        /// Sender's current epoch.
        epoch: u64,
        /// Sender's highest known LSN.
        last_lsn: Lsn,
    },
    /// Announces a role transition, broadcast by the new primary.
    RoleChange {
        /// The node's new role.
        new_role: Role,
        /// The epoch this role becomes effective at.
        epoch: u64,
    },
}

impl Frame {
    /// Encode to the on-wire form: `length(4, LE) | messagepack body`.
    pub fn to_bytes(&self) -> ReplicationResult<Vec<u8>> {
        let payload =
            rmp_serde::to_vec(self).map_err(|e| ReplicationError::Encoding(e.to_string()))?;
        let mut out = Vec::with_capacity(4 + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode a frame body (without the length prefix, already stripped by
    /// the caller's framed reader).
    pub fn from_payload(payload: &[u8]) -> ReplicationResult<Self> {
        rmp_serde::from_slice(payload).map_err(|e| ReplicationError::Encoding(e.to_string()))
    }
}
