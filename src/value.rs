//! Value Module
//!
//! Typed values for metadata attributes and scalar features, and the
//! n-dimensional array model used for non-scalar features.
//!
//! ## Type Mapping
//! ```text
//! ┌───────────┬───────────────────────────┬──────────────────────────┐
//! │ ValueType │ Scalar / attribute value  │ Array element            │
//! ├───────────┼───────────────────────────┼──────────────────────────┤
//! │ Float64   │ Value::Float64(f64)       │ ArrayData::Float64       │
//! │ Int64     │ Value::Int64(i64)         │ ArrayData::Int64         │
//! │ UInt8     │ (arrays only)             │ ArrayData::UInt8         │
//! │ Bool      │ Value::Bool(bool)         │ ArrayData::Bool          │
//! │ Str       │ Value::Str(String)        │ (attributes only)        │
//! └───────────┴───────────────────────────┴──────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RtdcError};

/// Element type of a value or array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Float64,
    Int64,
    UInt8,
    Bool,
    Str,
}

impl ValueType {
    /// Short lowercase name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Float64 => "float64",
            ValueType::Int64 => "int64",
            ValueType::UInt8 => "uint8",
            ValueType::Bool => "bool",
            ValueType::Str => "str",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Scalar Values
// =============================================================================

/// A single scalar value (one event of a scalar feature, or one attribute)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Float64(f64),
    Int64(i64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// Get the value's type
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Float64(_) => ValueType::Float64,
            Value::Int64(_) => ValueType::Int64,
            Value::Bool(_) => ValueType::Bool,
            Value::Str(_) => ValueType::Str,
        }
    }

    /// Exact identity, comparing floats bit-for-bit (so NaN equals NaN)
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float64(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

// =============================================================================
// Array Data
// =============================================================================

/// Flat, homogeneously typed element storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Float64(Vec<f64>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    Bool(Vec<bool>),
}

impl ArrayData {
    /// Create an empty array of the given element type
    ///
    /// Returns `None` for `Str`, which has no array representation.
    pub fn empty(dtype: ValueType) -> Option<Self> {
        match dtype {
            ValueType::Float64 => Some(ArrayData::Float64(Vec::new())),
            ValueType::Int64 => Some(ArrayData::Int64(Vec::new())),
            ValueType::UInt8 => Some(ArrayData::UInt8(Vec::new())),
            ValueType::Bool => Some(ArrayData::Bool(Vec::new())),
            ValueType::Str => None,
        }
    }

    pub fn dtype(&self) -> ValueType {
        match self {
            ArrayData::Float64(_) => ValueType::Float64,
            ArrayData::Int64(_) => ValueType::Int64,
            ArrayData::UInt8(_) => ValueType::UInt8,
            ArrayData::Bool(_) => ValueType::Bool,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Float64(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::UInt8(v) => v.len(),
            ArrayData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index` as a scalar value (u8 elements widen to Int64)
    pub fn value_at(&self, index: usize) -> Option<Value> {
        match self {
            ArrayData::Float64(v) => v.get(index).map(|x| Value::Float64(*x)),
            ArrayData::Int64(v) => v.get(index).map(|x| Value::Int64(*x)),
            ArrayData::UInt8(v) => v.get(index).map(|x| Value::Int64(*x as i64)),
            ArrayData::Bool(v) => v.get(index).map(|x| Value::Bool(*x)),
        }
    }

    /// Copy of the elements in `range`
    pub fn slice(&self, range: std::ops::Range<usize>) -> Option<ArrayData> {
        match self {
            ArrayData::Float64(v) => v.get(range).map(|s| ArrayData::Float64(s.to_vec())),
            ArrayData::Int64(v) => v.get(range).map(|s| ArrayData::Int64(s.to_vec())),
            ArrayData::UInt8(v) => v.get(range).map(|s| ArrayData::UInt8(s.to_vec())),
            ArrayData::Bool(v) => v.get(range).map(|s| ArrayData::Bool(s.to_vec())),
        }
    }

    /// Append all elements of `other`; both arrays must share a dtype
    pub fn extend_from(&mut self, other: &ArrayData) -> Result<()> {
        match (self, other) {
            (ArrayData::Float64(a), ArrayData::Float64(b)) => a.extend_from_slice(b),
            (ArrayData::Int64(a), ArrayData::Int64(b)) => a.extend_from_slice(b),
            (ArrayData::UInt8(a), ArrayData::UInt8(b)) => a.extend_from_slice(b),
            (ArrayData::Bool(a), ArrayData::Bool(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(RtdcError::TypeMismatch {
                    name: "array".to_string(),
                    expected: a.dtype(),
                    actual: b.dtype(),
                })
            }
        }
        Ok(())
    }
}

impl From<Vec<f64>> for ArrayData {
    fn from(v: Vec<f64>) -> Self {
        ArrayData::Float64(v)
    }
}

impl From<Vec<i64>> for ArrayData {
    fn from(v: Vec<i64>) -> Self {
        ArrayData::Int64(v)
    }
}

impl From<Vec<u8>> for ArrayData {
    fn from(v: Vec<u8>) -> Self {
        ArrayData::UInt8(v)
    }
}

impl From<Vec<bool>> for ArrayData {
    fn from(v: Vec<bool>) -> Self {
        ArrayData::Bool(v)
    }
}

// =============================================================================
// N-Dimensional Arrays
// =============================================================================

/// Row-major n-dimensional array: one event's entry for a non-scalar feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NdArray {
    /// Create an array, checking that `shape` covers exactly `data.len()` elements
    pub fn new(shape: Vec<usize>, data: impl Into<ArrayData>) -> Result<Self> {
        let data = data.into();
        let expected = element_count(&shape).ok_or_else(|| RtdcError::ShapeMismatch {
            name: "array".to_string(),
            expected: "a shape whose element count fits in usize".to_string(),
            actual: format!("{:?}", shape),
        })?;
        if expected != data.len() {
            return Err(RtdcError::ShapeMismatch {
                name: "array".to_string(),
                expected: format!("{} elements for shape {:?}", expected, shape),
                actual: format!("{} elements", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> ValueType {
        self.data.dtype()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_parts(self) -> (Vec<usize>, ArrayData) {
        (self.shape, self.data)
    }
}

/// Number of elements covered by `shape`, or `None` on overflow
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
}
