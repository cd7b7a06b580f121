//! Inverse reference sets.
//!
//! Per Design Note "Inverse reference sets": the set of live sources
//! pointing at a target through a given slot is an indexed side-table
//! maintained transactionally, never a collection owned by the target
//! object. This avoids cyclic ownership between source and target and lets
//! the object store evolve the representation independently of `Object`.
//!
//! Each bucket keeps one small newest-first event chain per source, mirroring
//! `VersionChain`'s snapshot-walk shape, so a reader pinned to an older CSN
//! sees the inverse set as it stood at that snapshot rather than the set's
//! current, live membership.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use velox_core::{Csn, ObjectId};

/// Key addressing one inverse-reference bucket: a specific target object
/// through a specific reference slot index on its class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    target: ObjectId,
    slot_index: usize,
}

/// One membership change for a source within a bucket: `present` says
/// whether the edge existed starting at `csn`.
#[derive(Debug, Clone, Copy)]
struct Edge {
    csn: Csn,
    present: bool,
}

/// A bucket's per-source history, newest edge first.
#[derive(Debug, Default)]
struct Bucket {
    history: HashMap<ObjectId, Vec<Edge>>,
}

impl Bucket {
    fn record(&mut self, source: ObjectId, csn: Csn, present: bool) {
        self.history.entry(source).or_default().insert(0, Edge { csn, present });
    }

    fn members_at(&self, snapshot: Csn) -> Vec<ObjectId> {
        self.history
            .iter()
            .filter_map(|(source, edges)| {
                let edge = edges.iter().find(|e| e.csn <= snapshot)?;
                edge.present.then_some(*source)
            })
            .collect()
    }
}

/// Side-table of inverse reference sets, keyed by `(target, slot)`.
#[derive(Debug, Default)]
pub struct InverseIndex {
    buckets: DashMap<BucketKey, RwLock<Bucket>>,
}

impl InverseIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Record that `source` began referencing `target` through `slot_index`
    /// as of `csn`.
    pub fn insert(&self, target: ObjectId, slot_index: usize, source: ObjectId, csn: Csn) {
        let key = BucketKey { target, slot_index };
        self.buckets
            .entry(key)
            .or_default()
            .write()
            .record(source, csn, true);
    }

    /// Record that `source` stopped referencing `target` through
    /// `slot_index` as of `csn`.
    pub fn remove(&self, target: ObjectId, slot_index: usize, source: ObjectId, csn: Csn) {
        let key = BucketKey { target, slot_index };
        self.buckets
            .entry(key)
            .or_default()
            .write()
            .record(source, csn, false);
    }

    /// Sources pointing at `target` through `slot_index` as visible to a
    /// reader pinned at `snapshot`.
    pub fn members_at(&self, target: ObjectId, slot_index: usize, snapshot: Csn) -> Vec<ObjectId> {
        let key = BucketKey { target, slot_index };
        match self.buckets.get(&key) {
            Some(bucket) => bucket.read().members_at(snapshot),
            None => Vec::new(),
        }
    }

    /// Number of distinct sources pointing at `target` through `slot_index`
    /// as of `snapshot`; used to check the invariant that inverse-set
    /// cardinality equals the number of distinct live forward edges at any
    /// given snapshot.
    pub fn cardinality_at(&self, target: ObjectId, slot_index: usize, snapshot: Csn) -> usize {
        self.members_at(target, slot_index, snapshot).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sorted(mut ids: Vec<ObjectId>) -> Vec<ObjectId> {
        ids.sort();
        ids
    }

    #[test]
    fn insert_and_members_at_round_trip() {
        let index = InverseIndex::new();
        index.insert(ObjectId(10), 0, ObjectId(1), Csn(1));
        index.insert(ObjectId(10), 0, ObjectId(2), Csn(1));

        assert_eq!(
            sorted(index.members_at(ObjectId(10), 0, Csn(1))),
            vec![ObjectId(1), ObjectId(2)]
        );
    }

    #[test]
    fn remove_drops_a_single_source_from_that_csn_onward() {
        let index = InverseIndex::new();
        index.insert(ObjectId(10), 0, ObjectId(1), Csn(1));
        index.insert(ObjectId(10), 0, ObjectId(2), Csn(1));
        index.remove(ObjectId(10), 0, ObjectId(1), Csn(5));

        assert_eq!(index.members_at(ObjectId(10), 0, Csn(5)), vec![ObjectId(2)]);
    }

    #[test]
    fn a_snapshot_before_the_removal_still_sees_the_edge() {
        let index = InverseIndex::new();
        index.insert(ObjectId(10), 0, ObjectId(1), Csn(1));
        index.remove(ObjectId(10), 0, ObjectId(1), Csn(5));

        assert_eq!(index.members_at(ObjectId(10), 0, Csn(4)), vec![ObjectId(1)]);
        assert!(index.members_at(ObjectId(10), 0, Csn(5)).is_empty());
    }

    #[test]
    fn a_snapshot_before_the_insert_does_not_see_the_edge() {
        let index = InverseIndex::new();
        index.insert(ObjectId(10), 0, ObjectId(1), Csn(5));

        assert!(index.members_at(ObjectId(10), 0, Csn(4)).is_empty());
        assert_eq!(index.members_at(ObjectId(10), 0, Csn(5)), vec![ObjectId(1)]);
    }

    #[test]
    fn distinct_slots_do_not_share_buckets() {
        let index = InverseIndex::new();
        index.insert(ObjectId(10), 0, ObjectId(1), Csn(1));
        index.insert(ObjectId(10), 1, ObjectId(2), Csn(1));

        assert_eq!(index.members_at(ObjectId(10), 0, Csn(1)), vec![ObjectId(1)]);
        assert_eq!(index.members_at(ObjectId(10), 1, Csn(1)), vec![ObjectId(2)]);
    }

    #[test]
    fn re_adding_a_source_after_removal_is_visible_again() {
        let index = InverseIndex::new();
        index.insert(ObjectId(10), 0, ObjectId(1), Csn(1));
        index.remove(ObjectId(10), 0, ObjectId(1), Csn(5));
        index.insert(ObjectId(10), 0, ObjectId(1), Csn(9));

        assert!(index.members_at(ObjectId(10), 0, Csn(7)).is_empty());
        assert_eq!(index.members_at(ObjectId(10), 0, Csn(9)), vec![ObjectId(1)]);
    }

    #[test]
    fn cardinality_at_matches_member_count() {
        let index = InverseIndex::new();
        index.insert(ObjectId(5), 2, ObjectId(1), Csn(1));
        index.insert(ObjectId(5), 2, ObjectId(2), Csn(1));
        assert_eq!(index.cardinality_at(ObjectId(5), 2, Csn(1)), 2);
    }

    #[test]
    fn empty_bucket_returns_no_members() {
        let index = InverseIndex::new();
        assert!(index.members_at(ObjectId(1), 0, Csn(1)).is_empty());
        assert_eq!(index.cardinality_at(ObjectId(1), 0, Csn(1)), 0);
    }

    proptest! {
        /// For any interleaving of insert/remove events at increasing CSNs,
        /// `members_at` at a given snapshot must equal replaying the same
        /// event log directly: the indexed forward-edge set for a slot is
        /// exactly the union of sources whose last event at or before the
        /// snapshot was an insert.
        #[test]
        fn members_at_matches_a_direct_replay_of_the_event_log(
            events in proptest::collection::vec((0u64..6, 0u8..2), 1..40),
            snapshot in 0u64..60,
        ) {
            let index = InverseIndex::new();
            let target = ObjectId(100);
            let slot = 3;
            let mut reference: HashMap<ObjectId, bool> = HashMap::new();

            for (i, (source, kind)) in events.iter().enumerate() {
                let csn = Csn(i as u64 + 1);
                let source = ObjectId(*source);
                let present = *kind == 0;
                if present {
                    index.insert(target, slot, source, csn);
                } else {
                    index.remove(target, slot, source, csn);
                }
                if csn.0 <= snapshot {
                    reference.insert(source, present);
                }
            }

            let mut expected: Vec<ObjectId> = reference
                .into_iter()
                .filter_map(|(id, present)| present.then_some(id))
                .collect();
            expected.sort();

            let mut actual = index.members_at(target, slot, Csn(snapshot));
            actual.sort();

            prop_assert_eq!(actual, expected);
        }
    }
}
