//! Records: typed tuples belonging to a table
//!
//! A record is a mapping from field name to [`Value`]. Partial records (the
//! argument of `update` and the key argument of `find_by_pk`) use the same
//! representation; a field is "absent" by simply not being present in the map.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A record: ordered field-name → value mapping
///
/// Field order is the lexicographic order of field names, which keeps
/// serialized output and debug formatting stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a field value, returning `self` for chained construction
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Set a field value in place
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Check whether a field is present
    pub fn contains_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check for the empty record
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over `(field, value)` pairs in field order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Field names in field order
    pub fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Merge a partial record into this one, field-wise
    ///
    /// Every field present in `partial` overwrites the value here; fields
    /// absent from `partial` are untouched.
    pub fn merge(&mut self, partial: &Record) {
        for (field, value) in partial.iter() {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    /// A copy of this record restricted to `fields`
    ///
    /// An empty projection list keeps every field. Requested fields that the
    /// record does not carry are omitted from the result.
    pub fn project(&self, fields: &[&str]) -> Record {
        if fields.is_empty() {
            return self.clone();
        }
        let mut out = Record::new();
        for f in fields {
            if let Some(v) = self.fields.get(*f) {
                out.fields.insert((*f).to_string(), v.clone());
            }
        }
        out
    }

    /// Build a record from a JSON object
    ///
    /// Fails with [`Error::InvalidValue`] if the JSON is not an object or
    /// carries nested arrays/objects as field values.
    pub fn from_json(json: &serde_json::Value) -> Result<Record> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::InvalidValue(format!("record must be a JSON object: {json}")))?;
        let mut record = Record::new();
        for (field, value) in obj {
            record.fields.insert(field.clone(), Value::try_from(value)?);
        }
        Ok(record)
    }

    /// Render this record as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for (field, value) in &self.fields {
            obj.insert(field.clone(), serde_json::Value::from(value));
        }
        serde_json::Value::Object(obj)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Record {
    fn from(pairs: [(K, V); N]) -> Self {
        let mut record = Record::new();
        for (k, v) in pairs {
            record.set(k, v);
        }
        record
    }
}
