//! Metadata store
//!
//! Session-side record of every `section:key` written. A key may be set
//! again only to an identical value.

use std::collections::BTreeMap;

use crate::error::{Result, RtdcError};
use crate::schema::MetadataSchema;
use crate::value::Value;

/// Outcome of checking a proposed metadata value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataUpdate {
    /// Key not yet set
    New,

    /// Key already set to an identical value
    Unchanged,
}

/// Mapping from (section, key) to value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    values: BTreeMap<(String, String), Value>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `value` against the stored one without changing anything
    pub fn check(&self, section: &str, key: &str, value: &Value) -> Result<MetadataUpdate> {
        match self.get(section, key) {
            None => Ok(MetadataUpdate::New),
            Some(existing) if existing.same_as(value) => Ok(MetadataUpdate::Unchanged),
            Some(existing) => Err(RtdcError::MetadataConflict {
                section: section.to_string(),
                key: key.to_string(),
                existing: existing.clone(),
                proposed: value.clone(),
            }),
        }
    }

    /// Store `value`, replacing whatever was there
    pub(crate) fn insert(&mut self, section: &str, key: &str, value: Value) {
        self.values
            .insert((section.to_string(), key.to_string()), value);
    }

    pub(crate) fn remove(&mut self, section: &str, key: &str) -> Option<Value> {
        self.values.remove(&(section.to_string(), key.to_string()))
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.values.get(&(section.to_string(), key.to_string()))
    }

    pub fn contains(&self, section: &str, key: &str) -> bool {
        self.get(section, key).is_some()
    }

    /// Entries in (section, key) order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.values
            .iter()
            .map(|((section, key), value)| (section.as_str(), key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Qualified names of required schema keys not yet set
    pub fn missing_required(&self, schema: &MetadataSchema) -> Vec<String> {
        schema
            .all_required()
            .filter(|k| !self.contains(k.section(), k.key()))
            .map(|k| k.qualified_name())
            .collect()
    }
}
