//! Data types for ArcProc
//!
//! This module defines the column types a relation can declare.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::Value;

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Boolean type
    Boolean,
    /// Integer (64-bit)
    Integer,
    /// Double-precision floating point
    Float,
    /// Unlimited text
    Text,
}

impl DataType {
    /// Check whether a value may be stored in a column of this type.
    ///
    /// NULL is accepted here; nullability is a column property.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::Boolean, Value::Boolean(_)) => true,
            (DataType::Integer, Value::Integer(_)) => true,
            (DataType::Float, Value::Float(_) | Value::Integer(_)) => true,
            (DataType::Text, Value::Text(_)) => true,
            _ => false,
        }
    }

    /// Coerce a value into this type where the conversion is lossless
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (DataType::Float, Value::Integer(i)) => Value::Float(i as f64),
            (_, v) => v,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Text => write!(f, "TEXT"),
        }
    }
}
