//! Transaction handles and the commit pipeline.
//!
//! - [`transaction`]: `Transaction`, the per-call write-set buffer
//! - [`cascade`]: reference-integrity resolution (`Block`/`CascadeDelete`/`SetNull`)
//! - [`manager`]: `TransactionManager`, the serialized commit pipeline

#![warn(missing_docs)]

pub mod cascade;
pub mod manager;
pub mod transaction;

pub use manager::{replay, TransactionManager};
pub use transaction::{Mode, Transaction};
