//! Transaction handles: snapshots and the locally-buffered write-set.

use std::collections::{HashMap, HashSet};
use velox_core::{
    Csn, ObjectId, ObjectStore, ObjectVersion, ReferenceValue, ReferenceWrite, VeloxError,
    VeloxResult,
};
use velox_storage::Heap;

/// Isolation mode a transaction was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Snapshot read only; never enters the commit pipeline.
    Read,
    /// Builds a write-set locally; validated and installed at commit.
    ReadWrite,
}

/// A transaction's write-set: objects created or updated, objects deleted,
/// and reference writes that must update the inverse index at commit.
///
/// A `ReadWrite` transaction collects its write-set locally (copy-on-write
/// versions keyed by object id) and only serializes inside the
/// single-threaded commit pipeline.
pub struct Transaction {
    mode: Mode,
    snapshot_csn: Csn,
    write_set: HashMap<ObjectId, ObjectVersion>,
    deleted: HashSet<ObjectId>,
    reference_writes: Vec<ReferenceWrite>,
    closed: bool,
}

impl Transaction {
    /// Open a new transaction pinned to `snapshot_csn`.
    pub fn begin(mode: Mode, snapshot_csn: Csn) -> Self {
        Self {
            mode,
            snapshot_csn,
            write_set: HashMap::new(),
            deleted: HashSet::new(),
            reference_writes: Vec::new(),
            closed: false,
        }
    }

    /// This transaction's isolation mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The CSN this transaction's reads are pinned to.
    pub fn snapshot_csn(&self) -> Csn {
        self.snapshot_csn
    }

    fn require_read_write(&self) -> VeloxResult<()> {
        if self.mode != Mode::ReadWrite {
            return Err(VeloxError::ArgumentError(
                "write attempted on a Read transaction".into(),
            ));
        }
        if self.closed {
            return Err(VeloxError::ArgumentError(
                "transaction already committed or aborted".into(),
            ));
        }
        Ok(())
    }

    /// Read the current value of `id`, preferring this transaction's own
    /// uncommitted write over the snapshot (read-your-writes).
    pub fn get(&self, heap: &Heap, id: ObjectId) -> VeloxResult<Option<ObjectVersion>> {
        if self.deleted.contains(&id) {
            return Ok(None);
        }
        if let Some(version) = self.write_set.get(&id) {
            return Ok(Some(version.clone()));
        }
        heap.read(id, self.snapshot_csn)
    }

    /// Stage a newly created object's first version. The `ObjectId` itself
    /// was already allocated by the caller via [`velox_core::ObjectStore::allocate`];
    /// ids are never rolled back even if the transaction later aborts.
    pub fn stage_create(&mut self, id: ObjectId, version: ObjectVersion) -> VeloxResult<()> {
        self.require_read_write()?;
        self.write_set.insert(id, version);
        Ok(())
    }

    /// Stage an updated version for an existing object.
    pub fn stage_update(&mut self, id: ObjectId, version: ObjectVersion) -> VeloxResult<()> {
        self.require_read_write()?;
        self.write_set.insert(id, version);
        Ok(())
    }

    /// Record a reference-slot write so the commit pipeline can update the
    /// inverse index alongside installing the new version.
    pub fn stage_reference_write(&mut self, write: ReferenceWrite) -> VeloxResult<()> {
        self.require_read_write()?;
        self.reference_writes.push(write);
        Ok(())
    }

    /// Mark `id` for deletion. Cascade resolution may add further entries.
    pub fn stage_delete(&mut self, id: ObjectId) -> VeloxResult<()> {
        self.require_read_write()?;
        self.deleted.insert(id);
        self.write_set.remove(&id);
        Ok(())
    }

    /// Rewrite a `One`-cardinality reference slot to null, used by the
    /// `SetNull` cascade policy.
    pub fn set_null(&mut self, id: ObjectId, slot: &str) {
        if let Some(version) = self.write_set.get_mut(&id) {
            version.references.insert(slot.to_string(), ReferenceValue::Null);
        }
    }

    /// Object ids this transaction has staged a write or delete for.
    pub fn written_ids(&self) -> HashSet<ObjectId> {
        self.write_set.keys().copied().chain(self.deleted.iter().copied()).collect()
    }

    /// Ids marked for deletion.
    pub fn deleted_ids(&self) -> &HashSet<ObjectId> {
        &self.deleted
    }

    /// Uncommitted versions, keyed by object id.
    pub fn write_set(&self) -> &HashMap<ObjectId, ObjectVersion> {
        &self.write_set
    }

    /// Mutable access to the write-set, used by cascade resolution to stage
    /// further mutations before the pipeline stamps final CSNs.
    pub fn write_set_mut(&mut self) -> &mut HashMap<ObjectId, ObjectVersion> {
        &mut self.write_set
    }

    /// Reference writes staged so far, for inverse-index maintenance.
    pub fn reference_writes(&self) -> &[ReferenceWrite] {
        &self.reference_writes
    }

    /// Mark this transaction closed so further writes are rejected. Called
    /// by the manager once a commit or abort outcome is final.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Whether this transaction has already been committed or aborted.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
