//! Shared types, schema descriptors, and error taxonomy for VeloxDB.
//!
//! This crate defines the foundational types used across the engine:
//! - [`ids`]: `ObjectId`, `ClassId`, `Csn`, `Lsn` and their allocators
//! - [`schema`]: `ClassDescriptor`, `PropertyDescriptor`, `ReferenceDescriptor`
//! - [`value`]: `Value`, the runtime representation of a property
//! - [`object`]: `Object`, `ObjectVersion`, `ReferenceValue`
//! - [`error`]: `VeloxError`, the unified error type
//! - [`traits`]: `ObjectStore`, `SnapshotView` — the seams implemented by `velox-storage`

#![warn(missing_docs)]

pub mod error;
pub mod ids;
pub mod object;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod value;

pub use error::{VeloxError, VeloxResult};
pub use ids::{ClassId, Csn, CsnAllocator, Lsn, ObjectId, ObjectIdAllocator};
pub use object::{Object, ObjectVersion, ReferenceValue};
pub use registry::SchemaRegistry;
pub use schema::{Cardinality, ClassDescriptor, OnDelete, PropertyDescriptor, PropertyType, ReferenceDescriptor};
pub use traits::{ObjectStore, ReferenceWrite, SnapshotView};
pub use value::{Timestamp, Value};
