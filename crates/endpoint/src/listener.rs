//! The accept loop: admission control and per-connection task spawning.
//!
//! Grounded on `onepointking-minisql`'s `Server::run` (`TcpListener::bind`,
//! `loop { listener.accept().await }`, `tokio::spawn` per connection).

use crate::config::EndpointConfig;
use crate::connection::ConnectionHandler;
use crate::frame::{write_server_frame, ErrorBlob, ServerFrame};
use crate::worker_pool::{self, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use velox_dispatch::Dispatcher;

/// Owns the listening socket and admission-control counters for one
/// execution endpoint.
pub struct Listener {
    config: EndpointConfig,
    dispatcher: Arc<Dispatcher>,
    workers: Arc<WorkerPool>,
    open_connections: Arc<AtomicUsize>,
}

impl Listener {
    /// Build a listener over `dispatcher`, not yet bound to a socket.
    pub fn new(config: EndpointConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let workers = worker_pool::shared(config.worker_count);
        Self {
            config,
            dispatcher,
            workers,
            open_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind and run the accept loop. Never returns on success; only on a
    /// bind failure.
    ///
    /// `BacklogSize` governs the OS-level SYN backlog, which `tokio::net`
    /// does not expose a setter for; it is carried in [`EndpointConfig`] for
    /// documentation and future use with a raw socket2 listener.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "execution endpoint listening");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!(error = %e, peer = %peer, "failed to set TCP_NODELAY");
            }

            if self.open_connections.load(Ordering::SeqCst) >= self.config.max_open_conn_count {
                warn!(peer = %peer, "connection refused: MaxOpenConnCount reached");
                tokio::spawn(reject_with_busy(stream));
                continue;
            }

            self.open_connections.fetch_add(1, Ordering::SeqCst);
            info!(peer = %peer, "connection accepted");

            let dispatcher = Arc::clone(&self.dispatcher);
            let workers = Arc::clone(&self.workers);
            let open_connections = Arc::clone(&self.open_connections);
            let inactivity_timeout = self.config.inactivity_timeout;
            let auth_required = self.config.auth_required;

            tokio::spawn(async move {
                let handler =
                    ConnectionHandler::new(stream, dispatcher, workers, inactivity_timeout, auth_required);
                handler.run().await;
                open_connections.fetch_sub(1, Ordering::SeqCst);
                info!(peer = %peer, "connection closed");
            });
        }
    }
}

async fn reject_with_busy(mut stream: tokio::net::TcpStream) {
    let frame = ServerFrame::Error(ErrorBlob {
        kind: "Busy".to_string(),
        message: "server has reached MaxOpenConnCount".to_string(),
    });
    let _ = write_server_frame(&mut stream, 0, &frame).await;
}
