//! Unified error taxonomy for VeloxDB.
//!
//! Every fallible boundary in the engine eventually surfaces one of the
//! [`VeloxError`] variants; crate-local error types (`velox_wal::WalError`,
//! `velox_storage::StorageError`, ...) convert into it via `From` so callers
//! at the dispatcher boundary only ever match on this one enum.
//!
//! ```ignore
//! match result {
//!     Err(e) if e.is_retryable() => { /* backoff and retry */ }
//!     Err(e) if e.is_fatal() => { /* process exit */ }
//!     Err(e) => { /* surface to the client */ }
//!     Ok(v) => { /* ... */ }
//! }
//! ```

use thiserror::Error;

/// Result type alias for VeloxDB operations.
pub type VeloxResult<T> = std::result::Result<T, VeloxError>;

/// The unified error type surfaced at the Operation Dispatcher boundary.
///
/// Variant names mirror the error kinds table (one kind per caller-visible
/// failure category); nothing below the dispatcher leaks any other shape.
#[derive(Debug, Error)]
pub enum VeloxError {
    /// A frame could not be parsed or violated the wire protocol.
    #[error("client protocol error: {0}")]
    ClientProtocolError(String),

    /// TLS handshake or certificate validation failed.
    #[error("authentication failed: {0}")]
    AuthError(String),

    /// The dispatcher registry has no handler for `(apiName, opName)`.
    #[error("unknown operation: {api_name}.{op_name}")]
    OperationUnknown {
        /// Requested API name.
        api_name: String,
        /// Requested operation name.
        op_name: String,
    },

    /// Argument blob failed schema validation.
    #[error("argument error: {0}")]
    ArgumentError(String),

    /// The referenced object does not exist (or is not live at the snapshot).
    #[error("object not found: {0}")]
    NotFound(u64),

    /// First-committer-wins validation detected an overlapping write.
    #[error("transaction conflict on object {object_id}")]
    ConflictError {
        /// Object whose write caused the conflict.
        object_id: u64,
    },

    /// A reference, cascade, or null constraint was violated at commit.
    #[error("integrity error: {0}")]
    IntegrityError(String),

    /// A ReadWrite operation was attempted against a non-primary node.
    #[error("not primary (current epoch leader hint: {leader_hint:?})")]
    NotPrimary {
        /// Best-known hint at the current epoch's leader, if any.
        leader_hint: Option<String>,
    },

    /// Admission control rejected the request (connection or pipeline full).
    #[error("busy: {0}")]
    Busy(String),

    /// A synchronous standby did not acknowledge within its deadline.
    #[error("replication timeout waiting on standby {node_name}")]
    ReplicationTimeout {
        /// Standby that failed to acknowledge in time.
        node_name: String,
    },

    /// A checksum or structural invariant failed during a read or recovery scan.
    #[error("storage corruption: {0}")]
    StorageCorruption(String),

    /// Underlying I/O failure (WAL, snapshot, or socket).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure (config files, client argument payloads).
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl VeloxError {
    /// Build an [`VeloxError::OperationUnknown`].
    pub fn operation_unknown(api_name: impl Into<String>, op_name: impl Into<String>) -> Self {
        VeloxError::OperationUnknown {
            api_name: api_name.into(),
            op_name: op_name.into(),
        }
    }

    /// Build a [`VeloxError::ConflictError`] for the given object.
    pub fn conflict(object_id: u64) -> Self {
        VeloxError::ConflictError { object_id }
    }

    /// Build a [`VeloxError::NotPrimary`] with an optional leader hint.
    pub fn not_primary(leader_hint: Option<impl Into<String>>) -> Self {
        VeloxError::NotPrimary {
            leader_hint: leader_hint.map(Into::into),
        }
    }

    /// Build a [`VeloxError::ReplicationTimeout`] for the given standby.
    pub fn replication_timeout(node_name: impl Into<String>) -> Self {
        VeloxError::ReplicationTimeout {
            node_name: node_name.into(),
        }
    }

    /// True if a client may reasonably retry the exact same request.
    ///
    /// Used by `Busy` and `ConflictError` callers to decide on backoff versus
    /// surfacing the failure immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VeloxError::ConflictError { .. } | VeloxError::Busy(_)
        )
    }

    /// True if the error indicates the engine itself should stop serving
    /// requests rather than continue in a possibly-inconsistent state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VeloxError::StorageCorruption(_))
    }

    /// True if the condition is operator-visible but the engine continues
    /// serving requests in a degraded mode.
    pub fn is_degraded(&self) -> bool {
        matches!(self, VeloxError::ReplicationTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_and_busy_are_retryable() {
        assert!(VeloxError::conflict(1).is_retryable());
        assert!(VeloxError::Busy("pool full".into()).is_retryable());
        assert!(!VeloxError::NotFound(1).is_retryable());
    }

    #[test]
    fn storage_corruption_is_fatal() {
        let e = VeloxError::StorageCorruption("checksum mismatch".into());
        assert!(e.is_fatal());
        assert!(!e.is_retryable());
    }

    #[test]
    fn replication_timeout_is_degraded_not_fatal() {
        let e = VeloxError::replication_timeout("standby-1");
        assert!(e.is_degraded());
        assert!(!e.is_fatal());
    }

    #[test]
    fn display_includes_operation_names() {
        let e = VeloxError::operation_unknown("BlogApi", "CreateBlog");
        assert!(e.to_string().contains("BlogApi.CreateBlog"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: VeloxError = io_err.into();
        assert!(matches!(e, VeloxError::Io(_)));
    }
}
