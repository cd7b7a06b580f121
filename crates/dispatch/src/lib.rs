//! The operation dispatcher: a registry of handlers and the single seam
//! that opens, runs, and closes one transaction per invocation.
//!
//! - [`registry`]: `OperationRegistry`, `{apiName -> {opName -> handler}}`
//! - [`handler`]: `OperationHandler`, the per-operation contract
//! - [`view`]: `ReadView`/`WriteView`, the typed object-graph views handlers see
//! - [`dispatcher`]: `Dispatcher::invoke`

#![warn(missing_docs)]

pub mod dispatcher;
pub mod handler;
pub mod registry;
pub mod view;

pub use dispatcher::Dispatcher;
pub use handler::OperationHandler;
pub use registry::OperationRegistry;
pub use view::{ReadView, WriteView};
