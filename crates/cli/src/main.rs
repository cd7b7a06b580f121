//! VeloxDB server entry point.
//!
//! Two modes, both foreground processes (there is no daemonizing split in
//! this implementation): `--interactive` attaches the console and logs to
//! stdout regardless of the `Logging.Path` config; without it, logging
//! follows the configured path. Exit codes: `0` clean shutdown, `1`
//! configuration error, `2` recovery failure, `3` unrecoverable storage
//! corruption.

mod config;
mod logging;
mod schema_store;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use velox_core::{ObjectId, VeloxError};
use velox_dispatch::{Dispatcher, OperationRegistry};
use velox_endpoint::{EndpointConfig, Listener};
use velox_replication::{ClusterTopology, PrimaryReplicator, Role};
use velox_storage::Heap;
use velox_txn::TransactionManager;
use velox_wal::{ReplicationSink, WalWriter};

/// VeloxDB: an in-memory, transactional, object-oriented database engine.
#[derive(Parser, Debug)]
#[command(name = "velox-server", version, about)]
struct Args {
    /// Run in the foreground with console-attached logging, rather than as
    /// a managed background service.
    #[arg(long)]
    interactive: bool,

    /// Directory to read `velox.json` from for the install-dir config
    /// layer. Defaults to the current directory.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let install_dir = args.config.clone().unwrap_or_else(|| PathBuf::from("."));
    let system_dir = PathBuf::from("/etc/veloxdb");
    let user_dir = dirs_config_home();

    let mut server_config = match config::load_merged(&install_dir, &system_dir, &user_dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    if args.interactive {
        server_config.logging.path = None;
    }
    logging::init(&server_config.logging);

    if let Some(ssl) = &server_config.ssl {
        if ssl.enabled {
            error!("SSLConfiguration.Enabled is set, but this build does not terminate TLS");
            return ExitCode::from(1);
        }
    }

    info!(bind = %server_config.bind_address, db = %server_config.system_database_path.display(), "starting veloxdb");

    match run(server_config) {
        Ok(()) => ExitCode::from(0),
        Err(StartupFailure::Recovery(e)) => {
            error!(error = %e, "WAL recovery failed");
            ExitCode::from(2)
        }
        Err(StartupFailure::Corruption(e)) => {
            error!(error = %e, "unrecoverable storage corruption");
            ExitCode::from(3)
        }
    }
}

enum StartupFailure {
    Recovery(VeloxError),
    Corruption(VeloxError),
}

fn run(server_config: config::ServerConfig) -> Result<(), StartupFailure> {
    let db_root = &server_config.system_database_path;
    let wal_dir = db_root.join("wal");

    let schema = schema_store::load(db_root).map_err(StartupFailure::Recovery)?;

    let recovery = velox_wal::recover(&wal_dir).map_err(|e| StartupFailure::Recovery(wal_error(e)))?;
    if recovery.torn_write_discarded {
        info!("discarded a torn write at the WAL tail during recovery");
    }

    let next_object_id = highest_object_id(&recovery.records)
        .map(|id| id.0 + 1)
        .unwrap_or(1);
    let heap = Arc::new(Heap::new(next_object_id));

    let last_csn = velox_txn::replay(&recovery.records, &heap).map_err(StartupFailure::Corruption)?;

    let wal = WalWriter::open(&wal_dir, *b"velox-database-0").map_err(|e| StartupFailure::Recovery(wal_error(e)))?;

    let mut endpoint_config = EndpointConfig::default();
    endpoint_config.bind_addr = server_config.bind_address;
    endpoint_config.auth_required = server_config.ssl.as_ref().is_some_and(|ssl| ssl.enabled);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| StartupFailure::Recovery(VeloxError::Io(e)))?;

    if let Some(replication) = &server_config.replication {
        endpoint_config.worker_count = replication.primary_worker_count.max(1);
    }

    let replication_sink = server_config
        .replication
        .as_ref()
        .map(|r| start_replication(r, &runtime, Arc::clone(&heap), &wal_dir))
        .transpose()
        .map_err(StartupFailure::Recovery)?
        .flatten();

    let txn_manager = Arc::new(TransactionManager::new(
        Arc::clone(&schema),
        last_csn.0,
        Some(wal),
        replication_sink,
    ));

    let registry = Arc::new(OperationRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(registry, txn_manager, heap, schema));

    runtime.spawn(run_garbage_collector(Arc::clone(&dispatcher)));

    let listener = Listener::new(endpoint_config, dispatcher);

    runtime
        .block_on(listener.run())
        .map_err(|e| StartupFailure::Recovery(VeloxError::Io(e)))?;

    Ok(())
}

const GC_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically reclaim version-chain history behind the oldest live
/// snapshot. Runs for the lifetime of the server; errors have no return
/// path so there is nothing to propagate beyond the reclaimed count.
async fn run_garbage_collector(dispatcher: Arc<Dispatcher>) {
    let mut interval = tokio::time::interval(GC_INTERVAL);
    loop {
        interval.tick().await;
        let reclaimed = dispatcher.collect_garbage();
        if reclaimed > 0 {
            info!(reclaimed, "version garbage collector reclaimed storage");
        }
    }
}

/// Stand up this node's replication role from `Replication.ClusterConfigFile`.
///
/// Returns `Some(sink)` only for a `Primary` node, which the commit pipeline
/// consults on every write. A `Standby` node spawns its inbound apply
/// listener but never ships anything itself, so it returns `None`; a node
/// with no `ClusterConfigFile` configured is a standalone engine and also
/// returns `None`.
fn start_replication(
    replication: &config::ReplicationConfig,
    runtime: &tokio::runtime::Runtime,
    heap: Arc<Heap>,
    wal_dir: &std::path::Path,
) -> Result<Option<Arc<dyn ReplicationSink>>, VeloxError> {
    let Some(cluster_config_file) = &replication.cluster_config_file else {
        return Ok(None);
    };

    let topology = ClusterTopology::load(std::path::Path::new(cluster_config_file))
        .map_err(|e| VeloxError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
    let this_node_name = replication.this_node_name.clone();
    let role = topology
        .self_role(&this_node_name)
        .map_err(|e| VeloxError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;

    match role {
        Role::Primary => {
            let peers = topology.peers_of(&this_node_name);
            let peer_configs: Vec<_> = peers.iter().map(|(_, cfg)| cfg.clone()).collect();
            let ack_timeout = Duration::from_millis(replication.sync_ack_timeout_ms);
            let replicator = Arc::new(PrimaryReplicator::new(&peer_configs, ack_timeout));

            for (addr, peer) in peers {
                let replicator = Arc::clone(&replicator);
                let this_node_name = this_node_name.clone();
                let wal_dir = wal_dir.to_path_buf();
                runtime.spawn(velox_replication::primary_link::spawn(
                    addr,
                    peer,
                    this_node_name,
                    0,
                    replicator,
                    wal_dir,
                ));
            }

            Ok(Some(replicator as Arc<dyn ReplicationSink>))
        }
        Role::Standby => {
            let self_addr = topology
                .self_address(&this_node_name)
                .map_err(|e| VeloxError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
            let applier = Arc::new(velox_replication::StandbyApplier::new(velox_core::Lsn::ZERO));
            runtime.spawn(async move {
                if let Err(e) = velox_replication::standby_link::serve(self_addr, applier, heap).await {
                    warn!(error = %e, "standby replication listener exited");
                }
            });
            Ok(None)
        }
        Role::Witness => {
            warn!(node = %this_node_name, "Witness role has no local work to spawn yet");
            Ok(None)
        }
    }
}

fn highest_object_id(records: &[velox_wal::LogRecord]) -> Option<ObjectId> {
    records
        .iter()
        .flat_map(|r| r.mutations.iter())
        .map(|m| match m {
            velox_wal::MutationEntry::Created { object_id, .. } => *object_id,
            velox_wal::MutationEntry::Updated { object_id, .. } => *object_id,
            velox_wal::MutationEntry::Deleted { object_id } => *object_id,
        })
        .max_by_key(|id| id.0)
}

fn wal_error(e: velox_wal::WalError) -> VeloxError {
    VeloxError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

fn dirs_config_home() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".config/veloxdb"))
        .unwrap_or_else(|_| PathBuf::from("."))
}
