//! Cluster topology: which nodes exist, where they listen, and how each
//! standby is synced, loaded from `Replication.ClusterConfigFile`.

use crate::role::{PeerConfig, Role, SyncMode};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Failure loading or parsing a cluster topology file. Maps to CLI exit
/// code 1 ("configuration error"), same as every other config failure.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The file could not be read.
    #[error("failed to read cluster config {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: std::path::PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The file was not valid JSON for the expected shape.
    #[error("failed to parse cluster config {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: std::path::PathBuf,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// The topology did not list `this_node_name`.
    #[error("cluster config does not list this node ({0})")]
    MissingSelf(String),
}

/// One node's entry in the cluster topology file.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyNode {
    /// The node's advertised name.
    pub node_name: String,
    /// Address its replication link listens on (standby) or connects to
    /// (as seen from a primary).
    pub address: SocketAddr,
    /// Sync policy a primary should apply when replicating to this node.
    /// Ignored for the entry naming the local node.
    #[serde(default = "default_sync")]
    pub sync: SyncMode,
    /// The role this node starts in. Promotion afterward is externally
    /// triggered via a `RoleChange` frame, not by editing this file and
    /// restarting.
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_sync() -> SyncMode {
    SyncMode::Async
}

fn default_role() -> Role {
    Role::Standby
}

/// The full cluster as read from `Replication.ClusterConfigFile`: every
/// node's name, address, and sync policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterTopology {
    /// Every node participating in the cluster, including this one.
    pub nodes: Vec<TopologyNode>,
}

impl ClusterTopology {
    /// Load and parse a topology file.
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let text = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| TopologyError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every peer other than `this_node_name`, as `(address, PeerConfig)`
    /// pairs ready to hand to `primary_link::spawn`.
    pub fn peers_of(&self, this_node_name: &str) -> Vec<(SocketAddr, PeerConfig)> {
        self.nodes
            .iter()
            .filter(|n| n.node_name != this_node_name)
            .map(|n| {
                (
                    n.address,
                    PeerConfig {
                        node_name: n.node_name.clone(),
                        sync: n.sync,
                    },
                )
            })
            .collect()
    }

    /// The address `this_node_name` should bind its standby link to, if it
    /// is listed in the topology.
    pub fn self_address(&self, this_node_name: &str) -> Result<SocketAddr, TopologyError> {
        self.self_node(this_node_name).map(|n| n.address)
    }

    /// The role `this_node_name` starts in.
    pub fn self_role(&self, this_node_name: &str) -> Result<Role, TopologyError> {
        self.self_node(this_node_name).map(|n| n.role)
    }

    fn self_node(&self, this_node_name: &str) -> Result<&TopologyNode, TopologyError> {
        self.nodes
            .iter()
            .find(|n| n.node_name == this_node_name)
            .ok_or_else(|| TopologyError::MissingSelf(this_node_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_topology(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn peers_of_excludes_the_local_node() {
        let file = write_topology(
            r#"{"nodes": [
                {"node_name": "primary", "address": "127.0.0.1:7600", "sync": "Async"},
                {"node_name": "standby-1", "address": "127.0.0.1:7601", "sync": "Sync"}
            ]}"#,
        );
        let topology = ClusterTopology::load(file.path()).unwrap();
        let peers = topology.peers_of("primary");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].1.node_name, "standby-1");
        assert_eq!(peers[0].1.sync, SyncMode::Sync);
    }

    #[test]
    fn self_address_resolves_the_named_node() {
        let file = write_topology(
            r#"{"nodes": [{"node_name": "primary", "address": "127.0.0.1:7600"}]}"#,
        );
        let topology = ClusterTopology::load(file.path()).unwrap();
        assert_eq!(topology.self_address("primary").unwrap().port(), 7600);
    }

    #[test]
    fn unknown_local_node_name_is_an_error() {
        let file = write_topology(
            r#"{"nodes": [{"node_name": "primary", "address": "127.0.0.1:7600"}]}"#,
        );
        let topology = ClusterTopology::load(file.path()).unwrap();
        assert!(matches!(
            topology.self_address("ghost"),
            Err(TopologyError::MissingSelf(_))
        ));
    }
}
