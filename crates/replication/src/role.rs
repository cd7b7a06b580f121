//! Cluster roles and the per-standby sync policy.

use serde::{Deserialize, Serialize};

/// A node's role within a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Accepts writes; replicates its commit stream to standbys.
    Primary,
    /// Applies a replicated commit stream; rejects `ReadWrite` operations.
    Standby,
    /// Observes the commit stream for quorum/monitoring purposes only;
    /// never promoted and never serves client reads.
    Witness,
}

/// Whether the primary's commit path must wait for a standby's ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Commit does not return to the client until this standby acks.
    Sync,
    /// This standby may lag; its ack is not on the commit's critical path.
    Async,
}

/// Static configuration for one standby in the cluster topology.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// The peer's advertised node name, as sent in its `Hello` frame.
    pub node_name: String,
    /// Sync policy for this peer.
    pub sync: SyncMode,
}

/// Cluster-wide replication configuration, set once at startup.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Worker count dedicated to serving the primary's replication stream.
    pub primary_worker_count: usize,
    /// Worker count each standby dedicates to applying incoming batches.
    pub standby_worker_count: usize,
    /// Whether each worker keeps its own connection to the peer, rather
    /// than multiplexing over a shared one.
    pub per_worker_connection: bool,
    /// The ordered list of standbys this primary replicates to.
    pub standbys: Vec<PeerConfig>,
    /// How long the primary waits for a `Sync` standby's ack before
    /// degrading it to `Failing` and continuing without it.
    pub sync_ack_timeout: std::time::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_messagepack() {
        let bytes = rmp_serde::to_vec(&Role::Standby).unwrap();
        let decoded: Role = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, Role::Standby);
    }
}
