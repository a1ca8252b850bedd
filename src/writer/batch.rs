//! Event batches
//!
//! A batch holds one column per feature. Scalar columns are flat arrays with
//! one element per event; non-scalar columns hold one array per event.
//! `EventBatch::single` and `with_event` build a batch of exactly one event.

use std::collections::BTreeMap;

use crate::error::{Result, RtdcError};
use crate::registry::Feature;
use crate::storage::Chunk;
use crate::value::{ArrayData, NdArray};

/// Values of one feature for every event of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureColumn {
    /// One element per event
    Scalars(ArrayData),

    /// One array per event (image, contour, trace)
    Entries(Vec<NdArray>),
}

impl FeatureColumn {
    /// Number of events in the column
    pub fn len(&self) -> usize {
        match self {
            FeatureColumn::Scalars(data) => data.len(),
            FeatureColumn::Entries(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backend chunk for this column, laid out per the feature's kind
    pub(crate) fn to_chunk(&self, feature: &Feature) -> Result<Chunk> {
        match self {
            FeatureColumn::Scalars(data) => Ok(Chunk::scalars(data.clone())),
            FeatureColumn::Entries(entries) if feature.is_ragged() => {
                Chunk::ragged(feature.value_type(), entries)
            }
            FeatureColumn::Entries(entries) => Chunk::fixed(feature.value_type(), entries),
        }
    }
}

/// One event's value for one feature
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    /// One element of a scalar feature
    Scalar(ArrayData),

    /// The entry of a non-scalar feature
    Array(NdArray),
}

impl From<f64> for EventValue {
    fn from(v: f64) -> Self {
        EventValue::Scalar(ArrayData::Float64(vec![v]))
    }
}

impl From<i64> for EventValue {
    fn from(v: i64) -> Self {
        EventValue::Scalar(ArrayData::Int64(vec![v]))
    }
}

impl From<bool> for EventValue {
    fn from(v: bool) -> Self {
        EventValue::Scalar(ArrayData::Bool(vec![v]))
    }
}

impl From<NdArray> for EventValue {
    fn from(array: NdArray) -> Self {
        EventValue::Array(array)
    }
}

impl From<EventValue> for FeatureColumn {
    fn from(value: EventValue) -> Self {
        match value {
            EventValue::Scalar(data) => FeatureColumn::Scalars(data),
            EventValue::Array(array) => FeatureColumn::Entries(vec![array]),
        }
    }
}

/// A group of events written in one call
///
/// Columns are kept in lexical feature order, which is also the order in
/// which they are validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBatch {
    columns: BTreeMap<String, FeatureColumn>,
}

impl EventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A one-event batch holding `value` for feature `name`
    pub fn single(name: impl Into<String>, value: impl Into<EventValue>) -> Self {
        Self::new().with_event(name, value)
    }

    /// Builder-style: set a one-event column for `name`
    pub fn with_event(mut self, name: impl Into<String>, value: impl Into<EventValue>) -> Self {
        self.columns.insert(name.into(), value.into().into());
        self
    }

    /// Builder-style: add a scalar column
    pub fn with_scalars(mut self, name: impl Into<String>, values: impl Into<ArrayData>) -> Self {
        self.insert_scalars(name, values);
        self
    }

    /// Builder-style: add a column of per-event arrays
    pub fn with_entries(mut self, name: impl Into<String>, entries: Vec<NdArray>) -> Self {
        self.insert_entries(name, entries);
        self
    }

    /// Set a scalar column, replacing any previous column of that name
    pub fn insert_scalars(&mut self, name: impl Into<String>, values: impl Into<ArrayData>) {
        self.columns
            .insert(name.into(), FeatureColumn::Scalars(values.into()));
    }

    /// Set a column of per-event arrays, replacing any previous column of that name
    pub fn insert_entries(&mut self, name: impl Into<String>, entries: Vec<NdArray>) {
        self.columns
            .insert(name.into(), FeatureColumn::Entries(entries));
    }

    pub fn get(&self, name: &str) -> Option<&FeatureColumn> {
        self.columns.get(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &FeatureColumn)> {
        self.columns.iter().map(|(name, column)| (name.as_str(), column))
    }

    /// Feature names in lexical order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if the batch has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Number of events, checking that every column has the same length
    pub fn event_count(&self) -> Result<u64> {
        let mut columns = self.columns.iter();
        let expected = match columns.next() {
            Some((_, column)) => column.len(),
            None => return Ok(0),
        };
        for (name, column) in columns {
            if column.len() != expected {
                return Err(RtdcError::BatchLengthMismatch {
                    name: name.clone(),
                    expected,
                    actual: column.len(),
                });
            }
        }
        Ok(expected as u64)
    }
}
