//! Seams between the object store and the rest of the engine.
//!
//! Defined here (in `velox-core`) rather than in `velox-storage` so that
//! `velox-txn`, `velox-dispatch`, and `velox-replication` can depend on the
//! contract without depending on a concrete storage implementation.

use crate::error::VeloxResult;
use crate::ids::{ClassId, Csn, ObjectId};
use crate::object::{ObjectVersion, ReferenceValue};

/// The live, mutable heap of database objects.
///
/// Implementations must be safe to call concurrently from multiple threads:
/// reads never block on other reads, and writes serialize only at the
/// granularity the implementation chooses (per-cell spinlocks on write,
/// lock-free reads, are a valid choice).
pub trait ObjectStore: Send + Sync {
    /// Allocate a new, never-before-used [`ObjectId`] for `class_id`.
    fn allocate(&self, class_id: ClassId) -> ObjectId;

    /// Read the version of `object_id` visible at `snapshot`, if any.
    fn read(&self, object_id: ObjectId, snapshot: Csn) -> VeloxResult<Option<ObjectVersion>>;

    /// Install `version` as the current state of `object_id`, stamped at `csn`.
    ///
    /// Called only from inside the commit pipeline, after conflict and
    /// integrity validation have both passed.
    fn write_version(&self, object_id: ObjectId, version: ObjectVersion, csn: Csn) -> VeloxResult<()>;

    /// Tombstone `object_id` as of `csn`.
    fn delete(&self, object_id: ObjectId, csn: Csn) -> VeloxResult<()>;

    /// All object ids of `class_id` visible at `snapshot`.
    fn scan_class(&self, class_id: ClassId, snapshot: Csn) -> VeloxResult<Vec<ObjectId>>;

    /// Live sources referencing `target` through `slot_index`, as of `snapshot`.
    fn inverse_set(
        &self,
        target: ObjectId,
        slot_index: usize,
        snapshot: Csn,
    ) -> VeloxResult<Vec<ObjectId>>;
}

/// A read-only, snapshot-bounded view over an [`ObjectStore`].
///
/// `Read` transactions hand this to operation handlers instead of a mutable
/// store handle, so the type system rules out write calls from read-mode
/// handlers rather than relying on a runtime check.
pub trait SnapshotView: Send + Sync {
    /// The CSN this view is pinned to.
    fn snapshot_csn(&self) -> Csn;

    /// Read the version of `object_id` visible at this view's snapshot.
    fn read(&self, object_id: ObjectId) -> VeloxResult<Option<ObjectVersion>>;

    /// All object ids of `class_id` visible at this view's snapshot.
    fn scan_class(&self, class_id: ClassId) -> VeloxResult<Vec<ObjectId>>;

    /// Live sources referencing `target` through `slot_index`.
    fn inverse_set(&self, target: ObjectId, slot_index: usize) -> VeloxResult<Vec<ObjectId>>;
}

/// A reference write pending validation, carried in a transaction's write-set.
///
/// Used by the transaction manager to compute inverse-set deltas without
/// depending on `velox_storage`'s internal representation.
#[derive(Debug, Clone)]
pub struct ReferenceWrite {
    /// Object whose slot is being written.
    pub source: ObjectId,
    /// Index of the reference slot within the class's descriptor.
    pub slot_index: usize,
    /// Value the slot held before this write (for inverse-set removal).
    pub before: ReferenceValue,
    /// Value the slot holds after this write (for inverse-set insertion).
    pub after: ReferenceValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_object_safe(_: &dyn ObjectStore) {}
    fn assert_snapshot_object_safe(_: &dyn SnapshotView) {}

    #[test]
    fn object_store_is_object_safe() {
        let _ = assert_object_safe as fn(&dyn ObjectStore);
    }

    #[test]
    fn snapshot_view_is_object_safe() {
        let _ = assert_snapshot_object_safe as fn(&dyn SnapshotView);
    }

    #[test]
    fn object_store_trait_objects_are_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Box<dyn ObjectStore>>();
        assert_sync::<Box<dyn ObjectStore>>();
    }

    #[test]
    fn snapshot_view_trait_objects_are_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Box<dyn SnapshotView>>();
        assert_sync::<Box<dyn SnapshotView>>();
    }
}
