//! Field values for records
//!
//! This module defines:
//! - Value: unified enum for all field value types
//! - Conversions from Rust primitives and `serde_json::Value`
//! - The comparison semantics used by the filter matcher

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Unified value type for record fields
///
/// Integers and floats form a single numeric domain for comparison purposes;
/// values from different domains never compare equal and are never ordered
/// relative to each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
}

impl Value {
    /// Name of the comparison domain this value belongs to
    pub fn domain(&self) -> ValueDomain {
        match self {
            Value::Null => ValueDomain::Null,
            Value::Bool(_) => ValueDomain::Bool,
            Value::Int(_) | Value::Float(_) => ValueDomain::Number,
            Value::String(_) => ValueDomain::Text,
        }
    }

    /// Numeric view of this value, if it is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Equality across the numeric domain, strict elsewhere
    ///
    /// `Int(1)` equals `Float(1.0)`; values from different domains never
    /// compare equal.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Ordering within the numeric or text domain
    ///
    /// Returns `None` for any cross-domain pair and for domains that carry
    /// no ordering (booleans, nulls).
    pub fn partial_cmp_domain(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Render this value as a primary-key component
    ///
    /// Null and empty-string components are rejected: they cannot form part
    /// of a primary key.
    pub fn to_pk_component(&self, field: &str) -> Result<String> {
        let rendered = match self {
            Value::Null => return Err(Error::PrimaryKeyValueNull(field.to_string())),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
        };
        if rendered.is_empty() {
            return Err(Error::PrimaryKeyValueNull(field.to_string()));
        }
        Ok(rendered)
    }
}

/// Comparison domain of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDomain {
    /// The null domain
    Null,
    /// Booleans
    Bool,
    /// Integers and floats
    Number,
    /// Strings
    Text,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl TryFrom<&serde_json::Value> for Value {
    type Error = Error;

    fn try_from(v: &serde_json::Value) -> Result<Self> {
        match v {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(Error::InvalidValue(format!("unrepresentable number: {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(Error::InvalidValue(format!(
                "arrays and objects are not field values: {other}"
            ))),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}
