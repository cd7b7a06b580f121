//! Configuration loading: layered JSON files merged install -> system ->
//! user, with `${...}` path template expansion.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures loading or resolving the server configuration. Every variant
/// here maps to CLI exit code 1 ("configuration error").
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config layer existed but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A config layer existed but was not valid JSON for its shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
    /// A path field referenced a `${Template}` with no known expansion.
    #[error("unresolvable path template `{0}`")]
    UnresolvedTemplate(String),
}

/// Partial config layer as read from a single JSON file; every field is
/// optional so a layer may override only what it sets.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    version: Option<u32>,
    #[serde(default)]
    execution_endpoint: Option<ExecutionEndpointConfig>,
    #[serde(default)]
    database: Option<DatabaseConfig>,
    #[serde(default)]
    ssl_configuration: Option<SslConfig>,
    #[serde(default)]
    logging: Option<LoggingConfig>,
    #[serde(default)]
    replication: Option<ReplicationConfig>,
}

/// `ExecutionEndpoint` config block.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionEndpointConfig {
    /// Address the TCP execution endpoint listens on.
    pub bind_address: SocketAddr,
}

/// `Database` config block.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding `schema/`, `wal/`, `snapshots/`, and `meta`.
    pub system_database_path: String,
}

/// `SSLConfiguration` config block. Carried through for the wire protocol's
/// optional TLS; this implementation does not yet terminate TLS itself, so
/// `enabled` is rejected rather than silently ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct SslConfig {
    /// Whether the execution endpoint should require TLS.
    pub enabled: bool,
    /// CA certificate path, template-expanded.
    #[serde(default)]
    pub ca_certificate_path: Option<String>,
    /// Certificate key path, template-expanded.
    #[serde(default)]
    pub certificate_key_path: Option<String>,
    /// Certificate store path, template-expanded.
    #[serde(default)]
    pub certificate_store_path: Option<String>,
    /// Store password.
    #[serde(default)]
    pub password: Option<String>,
}

/// `Logging` config block.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log file path, template-expanded. Empty or absent means stdout.
    #[serde(default)]
    pub path: Option<String>,
    /// Engine-target filter level.
    #[serde(default = "default_level")]
    pub level: String,
    /// `user`-target filter level, independent of `level`.
    #[serde(default = "default_level")]
    pub user_level: String,
}

fn default_level() -> String {
    "Info".to_string()
}

/// `Replication` config block.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConfig {
    /// This node's name, as it appears in peers' `PeerConfig.node_name`.
    pub this_node_name: String,
    /// Path to the cluster topology file (template-expanded).
    #[serde(default)]
    pub cluster_config_file: Option<String>,
    /// Worker count when this node is a primary.
    #[serde(default = "default_worker_count")]
    pub primary_worker_count: usize,
    /// Worker count when this node is a standby.
    #[serde(default = "default_worker_count")]
    pub standby_worker_count: usize,
    /// Whether each replication worker opens its own connection.
    #[serde(default)]
    pub use_separate_connection_per_worker: bool,
    /// How long a commit waits for a `Sync` standby's ack before degrading
    /// it to `Failing` and continuing.
    #[serde(default = "default_sync_ack_timeout_ms")]
    pub sync_ack_timeout_ms: u64,
}

fn default_worker_count() -> usize {
    4
}

fn default_sync_ack_timeout_ms() -> u64 {
    5_000
}

/// Fully merged, template-resolved configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Config schema version, if any layer declared one.
    pub version: Option<u32>,
    /// Execution endpoint bind address.
    pub bind_address: SocketAddr,
    /// Root of the persisted database state.
    pub system_database_path: PathBuf,
    /// TLS configuration, if present.
    pub ssl: Option<SslConfig>,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Replication configuration, if this node participates in a cluster.
    pub replication: Option<ReplicationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: None,
            bind_address: "127.0.0.1:7568".parse().unwrap(),
            system_database_path: PathBuf::from("./velox-data"),
            ssl: None,
            logging: LoggingConfig {
                path: None,
                level: default_level(),
                user_level: default_level(),
            },
            replication: None,
        }
    }
}

/// Load and merge the three config layers: `install_dir`, `system_dir`, and
/// `user_dir`, each looked up for a file named `velox.json`. A missing
/// layer is skipped, not an error; a present-but-malformed layer is.
pub fn load_merged(
    install_dir: &Path,
    system_dir: &Path,
    user_dir: &Path,
) -> Result<ServerConfig, ConfigError> {
    let mut merged = ServerConfig::default();
    for dir in [install_dir, system_dir, user_dir] {
        let path = dir.join("velox.json");
        if let Some(layer) = read_layer(&path)? {
            apply_layer(&mut merged, layer, &path)?;
        }
    }
    Ok(merged)
}

fn read_layer(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ConfigFile = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(file))
}

fn apply_layer(merged: &mut ServerConfig, layer: ConfigFile, path: &Path) -> Result<(), ConfigError> {
    if let Some(version) = layer.version {
        merged.version = Some(version);
    }
    if let Some(endpoint) = layer.execution_endpoint {
        merged.bind_address = endpoint.bind_address;
    }
    if let Some(database) = layer.database {
        merged.system_database_path = PathBuf::from(expand_template(&database.system_database_path)?);
    }
    if let Some(mut ssl) = layer.ssl_configuration {
        ssl.ca_certificate_path = ssl.ca_certificate_path.map(|s| expand_template(&s)).transpose()?;
        ssl.certificate_key_path = ssl.certificate_key_path.map(|s| expand_template(&s)).transpose()?;
        ssl.certificate_store_path =
            ssl.certificate_store_path.map(|s| expand_template(&s)).transpose()?;
        merged.ssl = Some(ssl);
    }
    if let Some(mut logging) = layer.logging {
        logging.path = logging.path.map(|s| expand_template(&s)).transpose()?;
        merged.logging = logging;
    }
    if let Some(mut replication) = layer.replication {
        replication.cluster_config_file = replication
            .cluster_config_file
            .map(|s| expand_template(&s))
            .transpose()?;
        merged.replication = Some(replication);
    }
    let _ = path;
    Ok(())
}

/// Expand `${ApplicationData}`, `${LocalApplicationData}`, `${UserProfile}`,
/// `${Base}`, and `${Temp}` path templates against the process environment.
fn expand_template(value: &str) -> Result<String, ConfigError> {
    if !value.contains("${") {
        return Ok(value.to_string());
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::UnresolvedTemplate(value.to_string()))?;
        let name = &after[..end];
        out.push_str(&resolve_template_var(name)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_template_var(name: &str) -> Result<String, ConfigError> {
    let env_var = match name {
        "ApplicationData" => "APPDATA",
        "LocalApplicationData" => "LOCALAPPDATA",
        "UserProfile" => "HOME",
        "Base" => "VELOX_BASE_DIR",
        "Temp" => "TMPDIR",
        _ => return Err(ConfigError::UnresolvedTemplate(name.to_string())),
    };
    std::env::var(env_var)
        .or_else(|_| if name == "Temp" { Ok("/tmp".to_string()) } else { Err(()) })
        .map_err(|_| ConfigError::UnresolvedTemplate(name.to_string()))
}
