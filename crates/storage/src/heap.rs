//! The live object heap: the [`ObjectStore`] implementation.
//!
//! Uses `DashMap` for lock-free concurrent location lookups rather than a
//! single `RwLock<HashMap>`, with object locations organized into per-class
//! dense tables.

use crate::class_table::ClassTable;
use crate::inverse_index::InverseIndex;
use dashmap::DashMap;
use velox_core::{
    ClassId, Csn, ObjectId, ObjectIdAllocator, ObjectStore, ObjectVersion, VeloxError,
    VeloxResult,
};

/// Where an object's slot lives: which class table, and at what index.
#[derive(Debug, Clone, Copy)]
struct Location {
    class_id: ClassId,
    slot_index: u32,
}

/// The in-memory heap shared by the transaction manager and every reader.
pub struct Heap {
    ids: ObjectIdAllocator,
    tables: DashMap<ClassId, ClassTable>,
    locations: DashMap<ObjectId, Location>,
    pub(crate) inverse: InverseIndex,
}

impl Heap {
    /// A fresh, empty heap whose first allocated `ObjectId` is `first_id`.
    ///
    /// Recovery passes `first_id` as one past the highest id observed while
    /// replaying the WAL; a brand-new database passes 1.
    pub fn new(first_id: u64) -> Self {
        Self {
            ids: ObjectIdAllocator::starting_at(first_id),
            tables: DashMap::new(),
            locations: DashMap::new(),
            inverse: InverseIndex::new(),
        }
    }

    fn table_for(&self, class_id: ClassId) -> dashmap::mapref::one::Ref<'_, ClassId, ClassTable> {
        self.tables
            .entry(class_id)
            .or_insert_with(ClassTable::new)
            .downgrade()
    }

    /// Access the inverse-reference index directly, for use by the
    /// transaction manager when applying reference writes.
    pub fn inverse_index(&self) -> &InverseIndex {
        &self.inverse
    }

    /// Reclaim version-chain history no live snapshot at or above
    /// `min_live_snapshot` can still observe.
    ///
    /// Returns the total number of versions reclaimed across every class.
    pub fn gc(&self, min_live_snapshot: Csn) -> usize {
        self.tables.iter().map(|table| table.gc(min_live_snapshot)).sum()
    }

    /// Register a location for `object_id` if one does not already exist.
    ///
    /// Used by WAL replay (crash recovery and standby batch application),
    /// where `object_id` was already allocated on the node that originally
    /// committed the write and must be reinstated at the same id rather
    /// than minted fresh via [`ObjectStore::allocate`].
    pub fn ensure_location(&self, object_id: ObjectId, class_id: ClassId) {
        if self.locations.contains_key(&object_id) {
            return;
        }
        let slot_index = self.table_for(class_id).allocate_slot();
        self.locations.insert(
            object_id,
            Location {
                class_id,
                slot_index,
            },
        );
    }
}

impl ObjectStore for Heap {
    fn allocate(&self, class_id: ClassId) -> ObjectId {
        let id = self.ids.allocate();
        let slot_index = self.table_for(class_id).allocate_slot();
        self.locations.insert(
            id,
            Location {
                class_id,
                slot_index,
            },
        );
        id
    }

    fn read(&self, object_id: ObjectId, snapshot: Csn) -> VeloxResult<Option<ObjectVersion>> {
        let Some(location) = self.locations.get(&object_id) else {
            return Ok(None);
        };
        let table = self.table_for(location.class_id);
        Ok(table.with_chain(location.slot_index, |chain| chain.get_at(snapshot).cloned()))
    }

    fn write_version(
        &self,
        object_id: ObjectId,
        version: ObjectVersion,
        _csn: Csn,
    ) -> VeloxResult<()> {
        let location = self.locations.get(&object_id).ok_or(VeloxError::NotFound(object_id.0))?;
        let table = self.table_for(location.class_id);
        table.with_chain_mut(location.slot_index, |chain| chain.push(version));
        Ok(())
    }

    fn delete(&self, object_id: ObjectId, csn: Csn) -> VeloxResult<()> {
        let location = self.locations.get(&object_id).ok_or(VeloxError::NotFound(object_id.0))?;
        let table = self.table_for(location.class_id);
        table.with_chain_mut(location.slot_index, |chain| chain.tombstone_latest(csn));
        Ok(())
    }

    fn scan_class(&self, class_id: ClassId, snapshot: Csn) -> VeloxResult<Vec<ObjectId>> {
        let mut ids = Vec::new();
        for entry in self.locations.iter() {
            if entry.value().class_id != class_id {
                continue;
            }
            let table = self.table_for(class_id);
            let visible =
                table.with_chain(entry.value().slot_index, |chain| chain.get_at(snapshot).is_some());
            if visible {
                ids.push(*entry.key());
            }
        }
        Ok(ids)
    }

    fn inverse_set(
        &self,
        target: ObjectId,
        slot_index: usize,
        snapshot: Csn,
    ) -> VeloxResult<Vec<ObjectId>> {
        Ok(self.inverse.members_at(target, slot_index, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn version(create: u64) -> ObjectVersion {
        ObjectVersion {
            class_id: ClassId(1),
            properties: HashMap::new(),
            references: HashMap::new(),
            create_csn: Csn(create),
            tombstone_csn: None,
        }
    }

    #[test]
    fn allocate_never_reuses_ids() {
        let heap = Heap::new(1);
        let a = heap.allocate(ClassId(1));
        let b = heap.allocate(ClassId(1));
        assert_ne!(a, b);
    }

    #[test]
    fn write_then_read_is_visible_at_creation_csn() {
        let heap = Heap::new(1);
        let id = heap.allocate(ClassId(1));
        heap.write_version(id, version(5), Csn(5)).unwrap();

        assert!(heap.read(id, Csn(4)).unwrap().is_none());
        assert!(heap.read(id, Csn(5)).unwrap().is_some());
    }

    #[test]
    fn delete_tombstones_the_latest_version() {
        let heap = Heap::new(1);
        let id = heap.allocate(ClassId(1));
        heap.write_version(id, version(5), Csn(5)).unwrap();
        heap.delete(id, Csn(10)).unwrap();

        assert!(heap.read(id, Csn(9)).unwrap().is_some());
        assert!(heap.read(id, Csn(10)).unwrap().is_none());
    }

    #[test]
    fn scan_class_only_returns_objects_of_that_class() {
        let heap = Heap::new(1);
        let a = heap.allocate(ClassId(1));
        let _b = heap.allocate(ClassId(2));
        heap.write_version(a, version(1), Csn(1)).unwrap();

        let scanned = heap.scan_class(ClassId(1), Csn(1)).unwrap();
        assert_eq!(scanned, vec![a]);
    }

    #[test]
    fn read_of_unallocated_id_is_not_found() {
        let heap = Heap::new(1);
        assert!(heap.read(ObjectId(999), Csn(1)).unwrap().is_none());
    }

    #[test]
    fn write_version_on_unallocated_id_errors() {
        let heap = Heap::new(1);
        let err = heap.write_version(ObjectId(999), version(1), Csn(1));
        assert!(matches!(err, Err(VeloxError::NotFound(999))));
    }

    #[test]
    fn gc_reclaims_tombstoned_versions_below_the_watermark() {
        let heap = Heap::new(1);
        let id = heap.allocate(ClassId(1));
        heap.write_version(id, version(1), Csn(1)).unwrap();
        heap.delete(id, Csn(2)).unwrap();
        heap.write_version(id, version(3), Csn(3)).unwrap();

        let reclaimed = heap.gc(Csn(100));
        assert_eq!(reclaimed, 1);
        assert!(heap.read(id, Csn(3)).unwrap().is_some());
    }
}
