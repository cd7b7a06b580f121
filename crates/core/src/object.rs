//! In-memory object instances and their reference state.

use crate::ids::{ClassId, Csn, ObjectId};
use crate::value::Value;
use std::collections::HashMap;
use serde::{Deserialize, Serialize};

/// The value bound to a single reference slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReferenceValue {
    /// A `One` slot with no target.
    Null,
    /// A `One` slot bound to a single target.
    Single(ObjectId),
    /// A `Many` slot, as an unordered set of targets.
    Many(Vec<ObjectId>),
}

impl ReferenceValue {
    /// All object ids currently referenced through this slot value.
    pub fn targets(&self) -> Vec<ObjectId> {
        match self {
            ReferenceValue::Null => Vec::new(),
            ReferenceValue::Single(id) => vec![*id],
            ReferenceValue::Many(ids) => ids.clone(),
        }
    }

    /// Remove `target` from this slot value, leaving `Many` slots intact
    /// (just without that entry) and turning a matching `Single` into `Null`.
    pub fn without(&self, target: ObjectId) -> ReferenceValue {
        match self {
            ReferenceValue::Null => ReferenceValue::Null,
            ReferenceValue::Single(id) if *id == target => ReferenceValue::Null,
            ReferenceValue::Single(id) => ReferenceValue::Single(*id),
            ReferenceValue::Many(ids) => {
                ReferenceValue::Many(ids.iter().copied().filter(|id| *id != target).collect())
            }
        }
    }
}

/// One version of an object's state, stamped with the CSN that created it.
///
/// Version chains (owned by the object store, not this type) keep these
/// sorted by `create_csn` descending so a reader can stop at the first
/// version visible to its snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectVersion {
    /// Class this object belongs to.
    pub class_id: ClassId,
    /// Scalar property values, keyed by property name.
    pub properties: HashMap<String, Value>,
    /// Reference slot values, keyed by slot name.
    pub references: HashMap<String, ReferenceValue>,
    /// CSN at which this version became visible.
    pub create_csn: Csn,
    /// CSN at which this version stopped being visible, if tombstoned.
    pub tombstone_csn: Option<Csn>,
}

impl ObjectVersion {
    /// Whether this version is visible to a reader with the given snapshot CSN.
    pub fn visible_at(&self, snapshot: Csn) -> bool {
        self.create_csn <= snapshot
            && self.tombstone_csn.map(|t| snapshot < t).unwrap_or(true)
    }
}

/// A live or historical object instance addressed by [`ObjectId`].
///
/// The object itself only carries identity; its data lives in the version
/// chain held by the object store, addressed by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Process-wide unique identifier.
    pub id: ObjectId,
    /// Class this object was created as.
    pub class_id: ClassId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_value_without_clears_matching_single() {
        let v = ReferenceValue::Single(ObjectId(5));
        assert_eq!(v.without(ObjectId(5)), ReferenceValue::Null);
        assert_eq!(v.without(ObjectId(6)), ReferenceValue::Single(ObjectId(5)));
    }

    #[test]
    fn reference_value_without_removes_one_entry_from_many() {
        let v = ReferenceValue::Many(vec![ObjectId(1), ObjectId(2), ObjectId(3)]);
        let after = v.without(ObjectId(2));
        assert_eq!(after, ReferenceValue::Many(vec![ObjectId(1), ObjectId(3)]));
    }

    #[test]
    fn version_visible_only_within_its_csn_window() {
        let version = ObjectVersion {
            class_id: ClassId(1),
            properties: HashMap::new(),
            references: HashMap::new(),
            create_csn: Csn(10),
            tombstone_csn: Some(Csn(20)),
        };
        assert!(!version.visible_at(Csn(9)));
        assert!(version.visible_at(Csn(10)));
        assert!(version.visible_at(Csn(19)));
        assert!(!version.visible_at(Csn(20)));
    }

    #[test]
    fn version_with_no_tombstone_is_visible_forever_after_creation() {
        let version = ObjectVersion {
            class_id: ClassId(1),
            properties: HashMap::new(),
            references: HashMap::new(),
            create_csn: Csn(5),
            tombstone_csn: None,
        };
        assert!(version.visible_at(Csn(5)));
        assert!(version.visible_at(Csn(Csn::MAX.0)));
    }
}
