//! Primary-key construction and re-keying
//!
//! A table declares an ordered list of fields as its primary key. The list
//! may be empty (records then carry an implicit generated `_id`), a single
//! field, or several fields forming a composite key. The primary key of a
//! record is a string: the stringified component values joined by `-` in
//! definition order.
//!
//! `-` is a structural separator; component values are not escaped. Callers
//! guarantee that stringified components cannot collide.

use crate::error::{Error, Result};
use crate::oid;
use crate::record::Record;
use std::collections::HashSet;

/// Field name of the implicit primary key used when none is declared
pub const DEFAULT_PK_FIELD: &str = "_id";

/// Separator between composite primary-key components
pub const PK_SEPARATOR: &str = "-";

/// Primary-key definition and machinery for one table
#[derive(Debug)]
pub struct PrimaryKey {
    /// Declared key fields in definition order; empty means implicit `_id`
    fields: Vec<String>,
}

impl PrimaryKey {
    /// Validate a primary-key definition
    ///
    /// # Errors
    /// Fails with [`Error::DuplicatePrimaryKeyDefinition`] when a field name
    /// appears more than once.
    pub fn new(fields: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.as_str()) {
                return Err(Error::DuplicatePrimaryKeyDefinition(field.clone()));
            }
        }
        Ok(PrimaryKey { fields })
    }

    /// Whether this table uses the implicit `_id` key
    pub fn is_default(&self) -> bool {
        self.fields.is_empty()
    }

    /// Declared key fields in definition order
    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    /// Build the primary-key string from a (possibly partial) record
    ///
    /// # Errors
    /// Fails with [`Error::PrimaryKeyValueNull`] when any component is
    /// missing, null, or stringifies to the empty string.
    pub fn build_pk(&self, record: &Record) -> Result<String> {
        if self.is_default() {
            let id = record
                .get(DEFAULT_PK_FIELD)
                .ok_or_else(|| Error::PrimaryKeyValueNull(DEFAULT_PK_FIELD.to_string()))?;
            return id.to_pk_component(DEFAULT_PK_FIELD);
        }

        let mut components = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = record
                .get(field)
                .ok_or_else(|| Error::PrimaryKeyValueNull(field.clone()))?;
            components.push(value.to_pk_component(field)?);
        }
        Ok(components.join(PK_SEPARATOR))
    }

    /// Prepare a record for insertion, generating a fresh `_id` if needed
    ///
    /// For the implicit key, a missing `_id` is filled with a generated
    /// object id. Returns the primary key together with the (possibly
    /// augmented) record.
    pub fn prepare_insert(&self, mut record: Record) -> Result<(String, Record)> {
        if self.is_default() && !record.contains_field(DEFAULT_PK_FIELD) {
            record.set(DEFAULT_PK_FIELD, oid::generate());
        }
        let pk = self.build_pk(&record)?;
        Ok((pk, record))
    }

    /// Whether a partial record carries at least one primary-key field
    pub fn is_partial_part_of_pk(&self, partial: &Record) -> bool {
        if self.is_default() {
            return partial.contains_field(DEFAULT_PK_FIELD);
        }
        self.fields.iter().any(|f| partial.contains_field(f))
    }

    /// Primary keys before and after applying `updates` to `current`
    ///
    /// Each component of the new key is taken from `updates` when present,
    /// falling back to `current`.
    pub fn old_and_new_pk(&self, current: &Record, updates: &Record) -> Result<(String, String)> {
        let old_pk = self.build_pk(current)?;
        let mut merged = current.clone();
        merged.merge(updates);
        let new_pk = self.build_pk(&merged)?;
        Ok((old_pk, new_pk))
    }
}
