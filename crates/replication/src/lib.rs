//! Primary/standby replication: wire frames, peer bookkeeping, and the
//! epoch-fenced role state machine.
//!
//! - [`frame`]: the `Hello`/`LogBatch`/`Ack`/`Heartbeat`/`RoleChange` wire vocabulary
//! - [`role`]: `Role`, `SyncMode`, and cluster topology configuration
//! - [`peer`]: primary-side per-standby state and synchronous quorum wait
//! - [`standby`]: standby-side strict-order batch application and gap detection
//! - [`cluster`]: epoch-fenced role transitions
//! - [`error`]: `ReplicationError`, convertible into `velox_core::VeloxError`
//! - [`topology`]: cluster topology file loading
//! - [`primary_link`]: primary-side outbound connection to one standby
//! - [`standby_link`]: standby-side inbound listener applying batches

#![warn(missing_docs)]

pub mod cluster;
pub mod error;
pub mod frame;
pub mod peer;
pub mod primary_link;
pub mod role;
pub mod standby;
pub mod standby_link;
pub mod topology;

pub use cluster::ClusterState;
pub use error::{ReplicationError, ReplicationResult};
pub use frame::Frame;
pub use peer::{PeerState, PeerStatus, PrimaryReplicator};
pub use role::{ClusterConfig, PeerConfig, Role, SyncMode};
pub use standby::{ApplyState, StandbyApplier};
pub use topology::{ClusterTopology, TopologyError, TopologyNode};
