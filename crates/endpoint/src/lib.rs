//! The TCP execution endpoint: accept loop, per-connection state machine,
//! and the bounded worker pool that runs dispatched operations.
//!
//! - [`config`]: `EndpointConfig` (`BacklogSize`, `MaxOpenConnCount`, ...)
//! - [`frame`]: the `{magic, version, type, length, requestId}`-headered
//!   client/server wire frames
//! - [`connection`]: `ConnectionHandler`, the per-connection read/dispatch/write loop
//! - [`worker_pool`]: `WorkerPool`, FIFO-fair admission of in-flight operations
//! - [`listener`]: `Listener`, the accept loop and admission control

#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod frame;
pub mod listener;
pub mod worker_pool;

pub use config::EndpointConfig;
pub use connection::{ConnectionHandler, ConnectionState};
pub use frame::{ClientFrame, ErrorBlob, FrameType, ServerFrame};
pub use listener::Listener;
pub use worker_pool::WorkerPool;
