//! Metadata Schema Module
//!
//! Authoritative catalog of configuration sections and keys.
//!
//! ## Responsibilities
//! - Reject sections and keys that are not in the catalog (no free-form metadata)
//! - Conform values to the key's declared type (lossless coercions only)
//! - Check per-key validity predicates
//! - Report which keys each section requires before a container may be finalized
//!
//! ## Coercions
//! ```text
//! declared   accepted input            stored as
//! float64    float64 | int64           float64
//! int64      int64 | integral float64  int64
//! bool       bool                      bool
//! str        str                       str (lowercased for normalised keys)
//! ```

mod catalog;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use chrono::{NaiveDate, NaiveTime};

use crate::error::{Result, RtdcError};
use crate::value::{Value, ValueType};

static STANDARD: LazyLock<Arc<MetadataSchema>> =
    LazyLock::new(|| Arc::new(MetadataSchema::from_trusted(catalog::standard_keys())));

/// Validity predicate applied after type conformance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Any,
    /// Numeric value > 0
    Positive,
    /// Numeric value >= 0
    NonNegative,
    /// Odd integer (kernel sizes)
    Odd,
    /// String from a fixed set
    OneOf(&'static [&'static str]),
    /// Calendar date `YYYY-MM-DD`
    IsoDate,
    /// Wall-clock time `HH:MM:SS`
    IsoTime,
}

impl Predicate {
    fn check(self, value: &Value) -> std::result::Result<(), String> {
        match self {
            Predicate::Any => Ok(()),
            Predicate::Positive => match value.as_f64() {
                Some(v) if v > 0.0 => Ok(()),
                _ => Err(format!("{} is not positive", value)),
            },
            Predicate::NonNegative => match value.as_f64() {
                Some(v) if v >= 0.0 => Ok(()),
                _ => Err(format!("{} is negative", value)),
            },
            Predicate::Odd => match value.as_i64() {
                Some(v) if v % 2 != 0 => Ok(()),
                _ => Err(format!("{} is not odd", value)),
            },
            Predicate::OneOf(options) => match value.as_str() {
                Some(s) if options.contains(&s) => Ok(()),
                _ => Err(format!("{} is not one of {:?}", value, options)),
            },
            Predicate::IsoDate => match value.as_str() {
                Some(s) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => Ok(()),
                _ => Err(format!("{} is not a YYYY-MM-DD date", value)),
            },
            Predicate::IsoTime => match value.as_str() {
                Some(s) if NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok() => Ok(()),
                _ => Err(format!("{} is not a HH:MM:SS time", value)),
            },
        }
    }
}

/// A registered metadata key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataKey {
    section: String,
    key: String,
    value_type: ValueType,
    required: bool,
    predicate: Predicate,
    lowercase: bool,
    description: String,
}

impl MetadataKey {
    /// An optional key with no predicate
    pub fn new(section: impl Into<String>, key: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            section: section.into(),
            key: key.into(),
            value_type,
            required: false,
            predicate: Predicate::Any,
            lowercase: false,
            description: String::new(),
        }
    }

    /// Mark the key as required for finalize
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Normalise string values to lowercase before checking
    pub fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn predicate(&self) -> Predicate {
        self.predicate
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// `section:key`, the identifier used in error messages
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.section, self.key)
    }

    /// Conform `value` to this key's type and check its predicate
    ///
    /// Returns the value exactly as it is to be stored.
    pub fn conform(&self, value: &Value) -> Result<Value> {
        let conformed = match (self.value_type, value) {
            (ValueType::Float64, Value::Float64(v)) => Value::Float64(*v),
            (ValueType::Float64, Value::Int64(v)) => Value::Float64(*v as f64),
            (ValueType::Int64, Value::Int64(v)) => Value::Int64(*v),
            (ValueType::Int64, Value::Float64(v))
                if v.is_finite()
                    && v.fract() == 0.0
                    && *v >= i64::MIN as f64
                    && *v < i64::MAX as f64 =>
            {
                Value::Int64(*v as i64)
            }
            (ValueType::Bool, Value::Bool(v)) => Value::Bool(*v),
            (ValueType::Str, Value::Str(s)) if self.lowercase => Value::Str(s.to_lowercase()),
            (ValueType::Str, Value::Str(s)) => Value::Str(s.clone()),
            (expected, other) => {
                return Err(RtdcError::TypeMismatch {
                    name: self.qualified_name(),
                    expected,
                    actual: other.value_type(),
                })
            }
        };

        self.predicate
            .check(&conformed)
            .map_err(|reason| RtdcError::InvalidValue {
                section: self.section.clone(),
                key: self.key.clone(),
                reason,
            })?;

        Ok(conformed)
    }
}

/// Closed catalog of sections and their keys
#[derive(Debug, Clone)]
pub struct MetadataSchema {
    sections: BTreeMap<String, BTreeMap<String, MetadataKey>>,
}

impl MetadataSchema {
    /// Build a schema, rejecting duplicate or empty section/key names
    pub fn new(keys: impl IntoIterator<Item = MetadataKey>) -> Result<Self> {
        let mut sections: BTreeMap<String, BTreeMap<String, MetadataKey>> = BTreeMap::new();
        for key in keys {
            if key.section.is_empty() || key.key.is_empty() {
                return Err(RtdcError::Registry(format!(
                    "metadata key {:?} has an empty section or key name",
                    key.qualified_name()
                )));
            }
            let name = key.qualified_name();
            let section = sections.entry(key.section.clone()).or_default();
            if section.insert(key.key.clone(), key).is_some() {
                return Err(RtdcError::Registry(format!("duplicate metadata key: {}", name)));
            }
        }
        Ok(Self { sections })
    }

    /// The compiled-in catalog of standard configuration keys
    pub fn standard() -> Arc<MetadataSchema> {
        Arc::clone(&STANDARD)
    }

    fn from_trusted(keys: Vec<MetadataKey>) -> Self {
        let mut sections: BTreeMap<String, BTreeMap<String, MetadataKey>> = BTreeMap::new();
        for key in keys {
            sections
                .entry(key.section.clone())
                .or_default()
                .insert(key.key.clone(), key);
        }
        Self { sections }
    }

    /// Look up a key; unknown sections are reported before unknown keys
    pub fn lookup(&self, section: &str, key: &str) -> Result<&MetadataKey> {
        let keys = self
            .sections
            .get(section)
            .ok_or_else(|| RtdcError::UnknownSection(section.to_string()))?;
        keys.get(key).ok_or_else(|| RtdcError::UnknownKey {
            section: section.to_string(),
            key: key.to_string(),
        })
    }

    /// True if the key exists and `value` conforms to it
    pub fn is_valid(&self, section: &str, key: &str, value: &Value) -> bool {
        self.lookup(section, key)
            .and_then(|k| k.conform(value))
            .is_ok()
    }

    /// Names of the required keys of `section` (empty for unknown sections)
    pub fn required_keys(&self, section: &str) -> BTreeSet<&str> {
        self.sections
            .get(section)
            .map(|keys| {
                keys.values()
                    .filter(|k| k.required)
                    .map(|k| k.key.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every required key across all sections, in (section, key) order
    pub fn all_required(&self) -> impl Iterator<Item = &MetadataKey> {
        self.sections
            .values()
            .flat_map(|keys| keys.values())
            .filter(|k| k.required)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(|s| s.as_str())
    }

    /// Keys of one section in lexical order
    pub fn keys(&self, section: &str) -> impl Iterator<Item = &MetadataKey> {
        self.sections.get(section).into_iter().flat_map(|k| k.values())
    }
}
