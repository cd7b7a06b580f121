//! `ExecutionEndpoint` configuration block.

use std::net::SocketAddr;
use std::time::Duration;

/// Tuning knobs for the TCP execution endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Address and port to listen on (default port 7568).
    pub bind_addr: SocketAddr,
    /// Max pending-accept connections before SYNs are dropped.
    pub backlog_size: u32,
    /// Hard ceiling on open connections; beyond it, new sockets are
    /// accepted only long enough to write a `Busy` error frame and close.
    pub max_open_conn_count: usize,
    /// Bytes available for request/response buffers.
    pub buffer_pool_size: usize,
    /// Idle-probe cadence.
    pub inactivity_interval: Duration,
    /// Idle deadline after which a connection is closed.
    pub inactivity_timeout: Duration,
    /// Per-connection read-side queue depth before producer backpressure.
    pub max_queued_chunk_count: usize,
    /// Worker pool size: max concurrently in-flight operations.
    pub worker_count: usize,
    /// Whether the handshake should challenge the client with
    /// `AuthChallenge`/`AuthResponse` before accepting `Invoke` frames.
    /// Set from `SSLConfiguration.Enabled`.
    pub auth_required: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7568".parse().expect("valid default bind address"),
            backlog_size: 1024,
            max_open_conn_count: 1024,
            buffer_pool_size: 16 * 1024 * 1024,
            inactivity_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(300),
            max_queued_chunk_count: 64,
            worker_count: 16,
            auth_required: false,
        }
    }
}
