//! Scalar property values.
//!
//! `Value` is the runtime representation of a property; `PropertyType`
//! (see [`crate::schema`]) is the declared type a given `Value` must
//! conform to. There is deliberately no `Array`/`Map` variant: nested
//! structure belongs to references, not properties, in this data model.

use serde::{Deserialize, Serialize};

/// Unix timestamp in milliseconds, stored as a plain integer rather than a
/// calendar type — the engine never needs timezone-aware arithmetic, only
/// total ordering and wire transport.
pub type Timestamp = i64;

/// A scalar property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value; only valid for nullable properties.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit floating point.
    F64(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Timestamp(Timestamp),
}

impl Value {
    /// True if this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The [`crate::schema::PropertyType`] this value would satisfy, or
    /// `None` for `Null` (which conforms to any nullable property).
    pub fn property_type(&self) -> Option<crate::schema::PropertyType> {
        use crate::schema::PropertyType;
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(PropertyType::Bool),
            Value::I64(_) => Some(PropertyType::I64),
            Value::F64(_) => Some(PropertyType::F64),
            Value::String(_) => Some(PropertyType::String),
            Value::Bytes(_) => Some(PropertyType::Bytes),
            Value::Timestamp(_) => Some(PropertyType::Timestamp),
        }
    }

    /// Whether this value conforms to `declared`, treating `Null` as
    /// conforming only when `nullable` is set.
    pub fn conforms_to(&self, declared: crate::schema::PropertyType, nullable: bool) -> bool {
        match self.property_type() {
            Some(actual) => actual == declared,
            None => nullable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PropertyType;

    #[test]
    fn null_conforms_only_when_nullable() {
        assert!(Value::Null.conforms_to(PropertyType::String, true));
        assert!(!Value::Null.conforms_to(PropertyType::String, false));
    }

    #[test]
    fn typed_value_conforms_to_matching_type_only() {
        let v = Value::I64(7);
        assert!(v.conforms_to(PropertyType::I64, false));
        assert!(!v.conforms_to(PropertyType::String, false));
    }

    #[test]
    fn round_trips_through_json() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::I64(-42),
            Value::F64(2.5),
            Value::String("x".into()),
            Value::Bytes(vec![1, 2, 3]),
            Value::Timestamp(1_700_000_000_000),
        ];
        for v in values {
            let json = serde_json::to_string(&v).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(v, back);
        }
    }
}
