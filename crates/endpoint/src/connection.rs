//! Per-connection framed read/dispatch/write loop.
//!
//! Shape follows `onepointking-minisql`'s `ConnectionHandler::run`: one task
//! per connection, owning its socket outright, looping `read -> dispatch ->
//! write` until the client disconnects or an I/O failure ends the loop.

use crate::frame::{read_client_frame, write_server_frame, ClientFrame, ErrorBlob, ServerFrame};
use crate::worker_pool::WorkerPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};
use velox_core::VeloxError;
use velox_dispatch::Dispatcher;

/// A connection's position in its per-connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, handler not yet started.
    Accepted,
    /// Exchanging `Hello` and, if `auth_required`, `AuthChallenge`/`AuthResponse`.
    Handshaking,
    /// Ready to read the next request frame.
    Ready,
    /// Blocked reading the next frame from the socket.
    Reading,
    /// A worker is running the requested operation.
    Dispatching,
    /// Writing the response frame back to the client.
    Writing,
    /// Tearing down after a timeout, I/O failure, or clean client close.
    Closing,
    /// Terminal state; the task is about to return.
    Closed,
}

fn error_blob(err: &VeloxError) -> ErrorBlob {
    let kind = match err {
        VeloxError::ClientProtocolError(_) => "ClientProtocolError",
        VeloxError::AuthError(_) => "AuthError",
        VeloxError::OperationUnknown { .. } => "OperationUnknown",
        VeloxError::ArgumentError(_) => "ArgumentError",
        VeloxError::NotFound(_) => "NotFound",
        VeloxError::ConflictError { .. } => "ConflictError",
        VeloxError::IntegrityError(_) => "IntegrityError",
        VeloxError::NotPrimary { .. } => "NotPrimary",
        VeloxError::Busy(_) => "Busy",
        VeloxError::ReplicationTimeout { .. } => "ReplicationTimeout",
        VeloxError::StorageCorruption(_) => "StorageCorruption",
        VeloxError::Io(_) => "Io",
        VeloxError::Serialization(_) => "Serialization",
    };
    ErrorBlob {
        kind: kind.to_string(),
        message: err.to_string(),
    }
}

/// Drives one accepted TCP connection to completion.
pub struct ConnectionHandler {
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    workers: Arc<WorkerPool>,
    inactivity_timeout: Duration,
    auth_required: bool,
    state: ConnectionState,
}

impl ConnectionHandler {
    /// Build a handler for a freshly accepted socket.
    pub fn new(
        stream: TcpStream,
        dispatcher: Arc<Dispatcher>,
        workers: Arc<WorkerPool>,
        inactivity_timeout: Duration,
        auth_required: bool,
    ) -> Self {
        Self {
            stream,
            dispatcher,
            workers,
            inactivity_timeout,
            auth_required,
            state: ConnectionState::Accepted,
        }
    }

    /// The connection's current state, exposed for the listener's
    /// connection-count bookkeeping and tests.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the handshake, then the read/dispatch/write loop until the
    /// client disconnects, an I/O error occurs, or the connection goes
    /// idle past its timeout.
    pub async fn run(mut self) {
        self.state = ConnectionState::Handshaking;
        if let Err(e) = self.handshake().await {
            warn!(error = %e, "connection handshake failed");
            self.state = ConnectionState::Closing;
            self.state = ConnectionState::Closed;
            return;
        }
        self.state = ConnectionState::Ready;

        loop {
            self.state = ConnectionState::Reading;
            let frame = tokio::time::timeout(self.inactivity_timeout, read_client_frame(&mut self.stream)).await;

            let (request_id, frame) = match frame {
                Ok(Ok(Some(framed))) => framed,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    warn!(error = %e, "connection read failed");
                    break;
                }
                Err(_) => {
                    info!("connection idle past inactivity timeout, closing");
                    break;
                }
            };

            match frame {
                ClientFrame::Invoke { api_name, op_name, args } => {
                    self.state = ConnectionState::Dispatching;
                    let response = self.dispatch(api_name, op_name, args).await;

                    self.state = ConnectionState::Writing;
                    if let Err(e) = write_server_frame(&mut self.stream, request_id, &response).await {
                        warn!(error = %e, "connection write failed");
                        break;
                    }
                }
                ClientFrame::Heartbeat => {
                    if let Err(e) = write_server_frame(&mut self.stream, request_id, &ServerFrame::Heartbeat).await {
                        warn!(error = %e, "connection write failed");
                        break;
                    }
                }
                ClientFrame::Goodbye => break,
                ClientFrame::Hello { .. } | ClientFrame::AuthResponse { .. } => {
                    let err = VeloxError::ClientProtocolError(
                        "Hello/AuthResponse is only valid during the handshake".into(),
                    );
                    let _ = write_server_frame(&mut self.stream, request_id, &ServerFrame::Error(error_blob(&err)))
                        .await;
                    break;
                }
            }
            self.state = ConnectionState::Ready;
        }

        self.state = ConnectionState::Closing;
        let _ = write_server_frame(&mut self.stream, 0, &ServerFrame::Goodbye).await;
        self.state = ConnectionState::Closed;
    }

    /// Exchange `Hello`, then — if `auth_required` — an `AuthChallenge` for
    /// an `AuthResponse`. A missing credential when auth is required closes
    /// the connection with `AuthError`; the acceptance check itself is a
    /// no-op today pending real credential validation.
    async fn handshake(&mut self) -> std::io::Result<()> {
        write_server_frame(&mut self.stream, 0, &ServerFrame::Hello { server_name: "veloxdb".into() }).await?;

        let (hello_id, hello) = read_client_frame(&mut self.stream)
            .await?
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "client closed during handshake"))?;
        if !matches!(hello, ClientFrame::Hello { .. }) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "expected Hello as the first client frame",
            ));
        }

        if !self.auth_required {
            return Ok(());
        }

        write_server_frame(
            &mut self.stream,
            hello_id,
            &ServerFrame::AuthChallenge { nonce: format!("{:x}", hello_id) },
        )
        .await?;

        let (response_id, response) = read_client_frame(&mut self.stream)
            .await?
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "client closed during auth"))?;
        let ClientFrame::AuthResponse { credential } = response else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "expected AuthResponse after AuthChallenge",
            ));
        };
        if credential.is_none() {
            let err = VeloxError::AuthError("no credential offered for required handshake".into());
            let _ =
                write_server_frame(&mut self.stream, response_id, &ServerFrame::Error(error_blob(&err))).await;
            return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, err.to_string()));
        }
        Ok(())
    }

    async fn dispatch(&self, api_name: String, op_name: String, args: serde_json::Value) -> ServerFrame {
        let _permit = self.workers.acquire().await;
        let dispatcher = Arc::clone(&self.dispatcher);
        let result = tokio::task::spawn_blocking(move || dispatcher.invoke(&api_name, &op_name, args))
            .await
            .expect("dispatch worker task panicked");
        match result {
            Ok(value) => ServerFrame::Result(value),
            Err(e) => ServerFrame::Error(error_blob(&e)),
        }
    }
}
