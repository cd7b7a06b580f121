//! The typed object-graph view handed to operation handlers.
//!
//! A handler receives a view scoped to its declared mode rather than a raw
//! transaction handle: a `Read` handler gets a
//! [`ReadView`] with no mutating methods at all, and a `ReadWrite` handler
//! gets a [`WriteView`]. The type distinction — not a runtime mode check —
//! is what rules out a `Read` handler attempting a write.

use std::collections::HashMap;
use velox_core::{
    ClassId, ObjectId, ObjectStore, ObjectVersion, ReferenceValue, SchemaRegistry, VeloxResult,
};
use velox_storage::Heap;
use velox_txn::Transaction;

/// Read-only access to the object graph at a transaction's snapshot.
pub struct ReadView<'a> {
    txn: &'a Transaction,
    heap: &'a Heap,
    schema: &'a SchemaRegistry,
}

impl<'a> ReadView<'a> {
    pub(crate) fn new(txn: &'a Transaction, heap: &'a Heap, schema: &'a SchemaRegistry) -> Self {
        Self { txn, heap, schema }
    }

    /// Read the current version of `id`, if live at this snapshot.
    pub fn get(&self, id: ObjectId) -> VeloxResult<Option<ObjectVersion>> {
        self.txn.get(self.heap, id)
    }

    /// All live object ids of `class_id` at this snapshot.
    pub fn scan_class(&self, class_id: ClassId) -> VeloxResult<Vec<ObjectId>> {
        self.heap.scan_class(class_id, self.txn.snapshot_csn())
    }

    /// Sources referencing `target` through `slot_index`, as visible at
    /// this transaction's snapshot.
    pub fn inverse_set(&self, target: ObjectId, slot_index: usize) -> Vec<ObjectId> {
        self.heap
            .inverse_index()
            .members_at(target, slot_index, self.txn.snapshot_csn())
    }

    /// The schema registry, for handlers that need a class's descriptor.
    pub fn schema(&self) -> &SchemaRegistry {
        self.schema
    }
}

/// Read/write access to the object graph, buffering writes into the
/// transaction's local write-set until the dispatcher commits.
pub struct WriteView<'a> {
    txn: &'a mut Transaction,
    heap: &'a Heap,
    schema: &'a SchemaRegistry,
}

impl<'a> WriteView<'a> {
    pub(crate) fn new(txn: &'a mut Transaction, heap: &'a Heap, schema: &'a SchemaRegistry) -> Self {
        Self { txn, heap, schema }
    }

    /// Read the current version of `id` (read-your-writes within this call).
    pub fn get(&self, id: ObjectId) -> VeloxResult<Option<ObjectVersion>> {
        self.txn.get(self.heap, id)
    }

    /// All live object ids of `class_id` at this snapshot.
    pub fn scan_class(&self, class_id: ClassId) -> VeloxResult<Vec<ObjectId>> {
        self.heap.scan_class(class_id, self.txn.snapshot_csn())
    }

    /// Sources referencing `target` through `slot_index`, as visible at
    /// this transaction's snapshot.
    pub fn inverse_set(&self, target: ObjectId, slot_index: usize) -> Vec<ObjectId> {
        self.heap
            .inverse_index()
            .members_at(target, slot_index, self.txn.snapshot_csn())
    }

    /// The schema registry, for handlers that need a class's descriptor.
    pub fn schema(&self) -> &SchemaRegistry {
        self.schema
    }

    /// Allocate a new object of `class_id` and stage its first version.
    pub fn create(
        &mut self,
        class_id: ClassId,
        properties: HashMap<String, velox_core::Value>,
        references: HashMap<String, ReferenceValue>,
    ) -> VeloxResult<ObjectId> {
        let id = self.heap.allocate(class_id);
        let version = ObjectVersion {
            class_id,
            properties,
            references,
            create_csn: self.txn.snapshot_csn(),
            tombstone_csn: None,
        };
        self.txn.stage_create(id, version)?;
        Ok(id)
    }

    /// Stage a new version for an existing object.
    pub fn update(&mut self, id: ObjectId, version: ObjectVersion) -> VeloxResult<()> {
        self.txn.stage_update(id, version)
    }

    /// Mark an object for deletion. Cascade resolution happens at commit.
    pub fn delete(&mut self, id: ObjectId) -> VeloxResult<()> {
        self.txn.stage_delete(id)
    }
}
