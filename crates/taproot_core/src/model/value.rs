//! Scalar attribute values exchanged between entities and rows.
//!
//! # Responsibility
//! - Define the runtime value type carried by plain attributes and columns.
//! - Convert losslessly to and from SQLite bind/result values.
//!
//! # Invariants
//! - `Bool` is stored as SQLite INTEGER 0/1.
//! - Blob columns are rejected as invalid persisted data, never coerced.

use rusqlite::types::{Value, ValueRef};
use serde::Serialize;
use std::collections::BTreeMap;

/// Column set destined for exactly one table row.
pub type Row = BTreeMap<String, AttrValue>;

/// Declared storage class of a plain attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Text,
    Integer,
    Real,
    Boolean,
}

impl ScalarType {
    /// SQLite column type used by the DDL builder.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
        }
    }
}

/// Runtime value of a scalar attribute or row column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl AttrValue {
    /// Bind value for SQLite statements.
    pub fn to_sql_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(value) => Value::Integer(i64::from(*value)),
            Self::Int(value) => Value::Integer(*value),
            Self::Real(value) => Value::Real(*value),
            Self::Text(value) => Value::Text(value.clone()),
        }
    }

    /// Reads one result column. Blobs are not part of the model.
    pub fn from_sql_ref(value: ValueRef<'_>) -> Result<Self, String> {
        match value {
            ValueRef::Null => Ok(Self::Null),
            ValueRef::Integer(value) => Ok(Self::Int(value)),
            ValueRef::Real(value) => Ok(Self::Real(value)),
            ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(Self::Text(text.to_string())),
                Err(_) => Err("non-utf8 text column".to_string()),
            },
            ValueRef::Blob(_) => Err("blob columns are not supported".to_string()),
        }
    }

    /// Reinterprets a raw column value under the declared scalar type.
    ///
    /// SQLite stores booleans as integers; everything else passes through
    /// when the storage class already matches.
    pub fn coerce(self, ty: ScalarType) -> Result<Self, String> {
        match (ty, self) {
            (_, Self::Null) => Ok(Self::Null),
            (ScalarType::Boolean, Self::Int(value)) => Ok(Self::Bool(value != 0)),
            (ScalarType::Boolean, Self::Bool(value)) => Ok(Self::Bool(value)),
            (ScalarType::Integer, Self::Int(value)) => Ok(Self::Int(value)),
            (ScalarType::Real, Self::Real(value)) => Ok(Self::Real(value)),
            (ScalarType::Real, Self::Int(value)) => Ok(Self::Real(value as f64)),
            (ScalarType::Text, Self::Text(value)) => Ok(Self::Text(value)),
            (ty, value) => Err(format!("value {value:?} does not fit {ty:?}")),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Option<i64>> for AttrValue {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Int)
    }
}

#[cfg(test)]
mod tests {
    use super::{AttrValue, ScalarType};

    #[test]
    fn bool_round_trips_through_integer_storage() {
        let stored = AttrValue::Bool(true).to_sql_value();
        assert_eq!(stored, rusqlite::types::Value::Integer(1));

        let raw = AttrValue::Int(1);
        assert_eq!(
            raw.coerce(ScalarType::Boolean).unwrap(),
            AttrValue::Bool(true)
        );
    }

    #[test]
    fn null_passes_every_coercion() {
        for ty in [
            ScalarType::Text,
            ScalarType::Integer,
            ScalarType::Real,
            ScalarType::Boolean,
        ] {
            assert_eq!(AttrValue::Null.coerce(ty).unwrap(), AttrValue::Null);
        }
    }

    #[test]
    fn mismatched_coercion_is_rejected() {
        assert!(AttrValue::Text("x".into()).coerce(ScalarType::Integer).is_err());
    }
}
