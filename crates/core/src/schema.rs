//! Schema descriptors: classes, properties, and reference slots.
//!
//! Per the design note on class inheritance (the source models classes via
//! abstract polymorphism; here each `Class` is a plain descriptor record —
//! properties and references are enumerated as arrays, and polymorphism
//! over classes is handled by tagged-variant dispatch in the object store,
//! not by a descriptor type hierarchy).

use crate::ids::ClassId;
use serde::{Deserialize, Serialize};

/// A scalar property's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    I64,
    /// 64-bit floating point.
    F64,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Bytes,
    /// Milliseconds since the Unix epoch.
    Timestamp,
}

/// Declared cardinality of a reference slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// At most one target.
    One,
    /// Any number of targets.
    Many,
}

/// What happens to a reference slot when its target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDelete {
    /// Deletion of the target is refused while a live reference remains.
    Block,
    /// Deleting the target also deletes every source referencing it.
    CascadeDelete,
    /// The source's reference is rewritten to null; requires nullability.
    SetNull,
}

/// Descriptor for a single scalar property on a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name, unique within its class.
    pub name: String,
    /// Declared scalar type.
    pub property_type: PropertyType,
    /// Whether `Value::Null` is a legal value for this property.
    pub nullable: bool,
    /// Default value used when a create operation omits this property.
    pub default: Option<crate::value::Value>,
}

/// Descriptor for a single reference slot on a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    /// Slot name, unique within its class.
    pub name: String,
    /// Class that targets of this slot must belong to.
    pub target_class: ClassId,
    /// One or many targets.
    pub cardinality: Cardinality,
    /// Policy applied when a target of this slot is deleted.
    pub on_delete: OnDelete,
    /// Whether the reverse direction is indexed as an inverse set.
    pub indexed: bool,
}

impl ReferenceDescriptor {
    /// `SetNull` only makes sense when the slot can actually hold null,
    /// i.e. when its cardinality is `One` (a `Many` slot drops the entry
    /// from the collection instead of nulling it).
    pub fn is_well_formed(&self) -> bool {
        !(self.on_delete == OnDelete::SetNull && self.cardinality == Cardinality::Many)
    }
}

/// A registered entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Stable numeric class id.
    pub class_id: ClassId,
    /// Human-readable class name.
    pub name: String,
    /// Ordered list of scalar properties.
    pub properties: Vec<PropertyDescriptor>,
    /// Ordered list of reference slots.
    pub references: Vec<ReferenceDescriptor>,
}

impl ClassDescriptor {
    /// Look up a property descriptor by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Look up a reference descriptor by slot name.
    pub fn reference(&self, name: &str) -> Option<&ReferenceDescriptor> {
        self.references.iter().find(|r| r.name == name)
    }

    /// Index of a reference slot within `references`, used to address the
    /// slot in the object store without re-hashing the name on every access.
    pub fn reference_slot_index(&self, name: &str) -> Option<usize> {
        self.references.iter().position(|r| r.name == name)
    }
}
