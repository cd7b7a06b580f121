//! The live object heap for VeloxDB: per-class version chains, the global
//! object location map, and inverse-reference indexes.
//!
//! [`Heap`] is the sole [`velox_core::ObjectStore`] implementation; readers
//! and the transaction manager interact with it only through that trait.

#![warn(missing_docs)]

pub mod class_table;
pub mod heap;
pub mod inverse_index;
pub mod version_chain;

pub use class_table::ClassTable;
pub use heap::Heap;
pub use inverse_index::InverseIndex;
pub use version_chain::VersionChain;
