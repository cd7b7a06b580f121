//! The explicit, process-wide schema registry.
//!
//! Per Design Note "Global state": process-wide singletons are created at
//! startup and passed to handlers through an explicit context rather than
//! reached for as an ambient global. `SchemaRegistry` is one such
//! singleton; it is constructed once during startup and shared behind an
//! `Arc` by the transaction manager, dispatcher, and endpoint.

use crate::ids::ClassId;
use crate::schema::ClassDescriptor;
use dashmap::DashMap;

/// Registered class descriptors, keyed by [`ClassId`].
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    classes: DashMap<ClassId, ClassDescriptor>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            classes: DashMap::new(),
        }
    }

    /// Register (or replace) a class descriptor.
    pub fn register(&self, class: ClassDescriptor) {
        self.classes.insert(class.class_id, class);
    }

    /// Look up a class descriptor by id.
    pub fn get(&self, class_id: ClassId) -> Option<ClassDescriptor> {
        self.classes.get(&class_id).map(|c| c.clone())
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True if no classes have been registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
