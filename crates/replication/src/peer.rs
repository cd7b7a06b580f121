//! Primary-side bookkeeping for a standby connection and synchronous commit.
//!
//! Grounded on `other_examples`' `tursodatabase-libsql` write-proxy
//! replication sketch for the ack/gap vocabulary, and on `motedb`'s
//! WAL/txn split for keeping peer liveness out of the commit pipeline's
//! critical section: each standby connection is driven by its own task,
//! and the primary only ever reads a shared `DashMap` snapshot of peer
//! state when deciding whether quorum has been reached.

use crate::error::{ReplicationError, ReplicationResult};
use crate::role::{PeerConfig, SyncMode};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::warn;
use velox_core::{Lsn, VeloxError, VeloxResult};
use velox_wal::{LogRecord, ReplicationSink};

/// What one standby's outbound link expects to receive: a contiguous run
/// of records starting at `start_lsn`, matching [`crate::frame::Frame::LogBatch`].
type LinkMessage = (Lsn, Vec<LogRecord>);

/// A standby's observed liveness from the primary's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// Acking within its deadline and not known to be behind.
    CaughtUp,
    /// Missed its ack deadline; excluded from the synchronous quorum until
    /// it catches up and re-acks.
    Failing,
}

/// Primary-side state tracked for one standby.
#[derive(Debug, Clone)]
pub struct PeerState {
    /// The peer's configured sync policy.
    pub sync: SyncMode,
    /// Highest LSN the peer has acknowledged as durably applied.
    pub last_acked_lsn: Lsn,
    /// Current liveness.
    pub status: PeerStatus,
}

impl PeerState {
    fn new(sync: SyncMode) -> Self {
        Self {
            sync,
            last_acked_lsn: Lsn::ZERO,
            status: PeerStatus::CaughtUp,
        }
    }
}

/// Tracks every standby's replication progress and gates commit on
/// synchronous quorum.
pub struct PrimaryReplicator {
    peers: DashMap<String, PeerState>,
    ack_timeout: Duration,
    notify: Arc<Notify>,
    links: DashMap<String, mpsc::UnboundedSender<LinkMessage>>,
}

impl PrimaryReplicator {
    /// Build a replicator for the given standby topology.
    pub fn new(standbys: &[PeerConfig], ack_timeout: Duration) -> Self {
        let peers = DashMap::new();
        for peer in standbys {
            peers.insert(peer.node_name.clone(), PeerState::new(peer.sync));
        }
        Self {
            peers,
            ack_timeout,
            notify: Arc::new(Notify::new()),
            links: DashMap::new(),
        }
    }

    /// Register the channel `crate::primary_link::spawn` hands batches to
    /// for `node_name`'s outbound connection task.
    pub fn register_link(&self, node_name: impl Into<String>, sender: mpsc::UnboundedSender<LinkMessage>) {
        self.links.insert(node_name.into(), sender);
    }

    /// Record an `Ack` from `node_name`.
    pub fn record_ack(&self, node_name: &str, through_lsn: Lsn) {
        if let Some(mut peer) = self.peers.get_mut(node_name) {
            if through_lsn > peer.last_acked_lsn {
                peer.last_acked_lsn = through_lsn;
            }
            peer.status = PeerStatus::CaughtUp;
        }
        self.notify.notify_waiters();
    }

    /// Current state of one peer, if it is part of the topology.
    pub fn peer_state(&self, node_name: &str) -> Option<PeerState> {
        self.peers.get(node_name).map(|p| p.clone())
    }

    /// Block until every `Sync` peer has acked through `batch_end_lsn`, or
    /// until `self.ack_timeout` elapses — at which point the still-lagging
    /// peers are degraded to `Failing` and the wait ends without error: the
    /// primary continues, operator-visibly, rather than blocking forever.
    pub async fn await_quorum(&self, batch_end_lsn: Lsn) -> ReplicationResult<()> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            if self.quorum_satisfied(batch_end_lsn) {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }

        let mut degraded = Vec::new();
        for mut entry in self.peers.iter_mut() {
            if entry.sync == SyncMode::Sync && entry.last_acked_lsn < batch_end_lsn {
                entry.status = PeerStatus::Failing;
                degraded.push(entry.key().clone());
            }
        }
        for node_name in &degraded {
            warn!(node_name, "sync standby missed ack deadline, degrading to Failing");
        }
        if degraded.is_empty() {
            Ok(())
        } else {
            Err(ReplicationError::Timeout {
                node_name: degraded.join(","),
            })
        }
    }

    fn quorum_satisfied(&self, batch_end_lsn: Lsn) -> bool {
        self.peers.iter().all(|entry| {
            entry.sync != SyncMode::Sync
                || entry.status == PeerStatus::Failing
                || entry.last_acked_lsn >= batch_end_lsn
        })
    }
}

impl ReplicationSink for PrimaryReplicator {
    /// Hands `records` to every registered standby link, then blocks the
    /// calling (blocking-pool) thread on [`PrimaryReplicator::await_quorum`]
    /// via the ambient Tokio runtime: commit does not return until local
    /// flush and synchronous-standby ack have both happened. Requires a
    /// runtime to be current — true in production, since `velox-endpoint`
    /// calls into the commit pipeline from inside `tokio::task::spawn_blocking`.
    fn ship(&self, start_lsn: Lsn, records: &[LogRecord]) -> VeloxResult<()> {
        for link in self.links.iter() {
            let _ = link.send((start_lsn, records.to_vec()));
        }
        let end_lsn = crate::standby::batch_end_lsn(start_lsn, records);
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            VeloxError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "replication ship() called outside a Tokio runtime",
            ))
        })?;
        handle.block_on(self.await_quorum(end_lsn)).map_err(VeloxError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standby::batch_end_lsn;

    fn config(name: &str, sync: SyncMode) -> PeerConfig {
        PeerConfig {
            node_name: name.into(),
            sync,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ship_blocks_until_registered_link_acks() {
        let replicator = Arc::new(PrimaryReplicator::new(
            &[config("s1", SyncMode::Sync)],
            Duration::from_millis(500),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        replicator.register_link("s1", tx);

        let replicator_for_acker = Arc::clone(&replicator);
        tokio::spawn(async move {
            let (start_lsn, records) = rx.recv().await.unwrap();
            let end_lsn = batch_end_lsn(start_lsn, &records);
            replicator_for_acker.record_ack("s1", end_lsn);
        });

        let replicator_for_ship = Arc::clone(&replicator);
        let record = LogRecord {
            csn: velox_core::Csn(1),
            schema_version: 1,
            mutations: Vec::new(),
        };
        tokio::task::spawn_blocking(move || {
            replicator_for_ship.ship(Lsn::new(1, 0), std::slice::from_ref(&record))
        })
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn quorum_is_satisfied_once_every_sync_peer_acks() {
        let replicator = PrimaryReplicator::new(
            &[config("s1", SyncMode::Sync), config("s2", SyncMode::Async)],
            Duration::from_millis(200),
        );
        replicator.record_ack("s1", Lsn::new(1, 100));
        replicator.await_quorum(Lsn::new(1, 100)).await.unwrap();
    }

    #[tokio::test]
    async fn async_peer_lag_never_blocks_quorum() {
        let replicator = PrimaryReplicator::new(
            &[config("s1", SyncMode::Async)],
            Duration::from_millis(50),
        );
        replicator.await_quorum(Lsn::new(1, 100)).await.unwrap();
    }

    #[tokio::test]
    async fn missed_sync_ack_deadline_degrades_and_returns_timeout() {
        let replicator = PrimaryReplicator::new(
            &[config("s1", SyncMode::Sync)],
            Duration::from_millis(20),
        );
        let result = replicator.await_quorum(Lsn::new(1, 100)).await;
        assert!(matches!(result, Err(ReplicationError::Timeout { .. })));
        assert_eq!(replicator.peer_state("s1").unwrap().status, PeerStatus::Failing);
    }
}
