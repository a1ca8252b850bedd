//! Schema Validator
//!
//! Pure checks of proposed feature values and metadata against the
//! feature registry and metadata schema. No I/O and no mutable state:
//! the same inputs always produce the same result.
//!
//! ## Shape Signatures
//! The first entry written for a non-scalar feature fixes its shape
//! signature. Later entries must match every fixed dimension:
//! ```text
//! image    declared (any, any)   first entry (80, 250)  signature (80, 250)
//! trace    declared (any)        first entry (177)      signature (177)
//! contour  declared (var, 2)     first entry (41, 2)    signature (*, 2)
//! ```

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, RtdcError};
use crate::registry::{DimSpec, Feature, FeatureRegistry};
use crate::schema::MetadataSchema;
use crate::value::{NdArray, Value};
use crate::writer::FeatureColumn;

/// One dimension of an established per-event shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    Fixed(usize),
    Variable,
}

/// Established per-event shape of a feature stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeSignature {
    dims: Vec<Dim>,
}

impl ShapeSignature {
    /// The signature of every scalar feature
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn new(dims: Vec<Dim>) -> Self {
        Self { dims }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    /// True if an entry of `shape` is structurally compatible
    pub fn accepts(&self, shape: &[usize]) -> bool {
        self.dims.len() == shape.len()
            && self.dims.iter().zip(shape).all(|(dim, n)| match dim {
                Dim::Fixed(m) => m == n,
                Dim::Variable => true,
            })
    }

    /// The per-event shape if no dimension is variable
    pub fn fixed_shape(&self) -> Option<Vec<usize>> {
        self.dims
            .iter()
            .map(|d| match d {
                Dim::Fixed(n) => Some(*n),
                Dim::Variable => None,
            })
            .collect()
    }

    fn infer(feature: &Feature, shape: &[usize]) -> Self {
        let dims = feature
            .dims()
            .iter()
            .zip(shape)
            .map(|(spec, n)| match spec {
                DimSpec::Any => Dim::Fixed(*n),
                DimSpec::Exact(m) => Dim::Fixed(*m),
                DimSpec::Variable => Dim::Variable,
            })
            .collect();
        Self { dims }
    }
}

impl fmt::Display for ShapeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            return f.write_str("scalar");
        }
        let parts: Vec<String> = self
            .dims
            .iter()
            .map(|d| match d {
                Dim::Fixed(n) => n.to_string(),
                Dim::Variable => "*".to_string(),
            })
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// A single event's value for one feature
#[derive(Debug, Clone, Copy)]
pub enum FeatureValue<'a> {
    Scalar(&'a Value),
    Array(&'a NdArray),
}

/// Validates features and metadata against an injected registry and schema
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    features: Arc<FeatureRegistry>,
    metadata: Arc<MetadataSchema>,
}

impl SchemaValidator {
    pub fn new(features: Arc<FeatureRegistry>, metadata: Arc<MetadataSchema>) -> Self {
        Self { features, metadata }
    }

    /// Validator over the compiled-in catalogs
    pub fn standard() -> Self {
        Self::new(FeatureRegistry::standard(), MetadataSchema::standard())
    }

    pub fn features(&self) -> &FeatureRegistry {
        &self.features
    }

    pub fn metadata(&self) -> &MetadataSchema {
        &self.metadata
    }

    // =========================================================================
    // Features
    // =========================================================================

    /// Validate one event's value for feature `name`
    ///
    /// `established` is the signature fixed by earlier writes, if any. On
    /// success returns the signature the feature has after this value.
    pub fn validate_feature_value(
        &self,
        name: &str,
        value: FeatureValue<'_>,
        established: Option<&ShapeSignature>,
    ) -> Result<ShapeSignature> {
        let feature = self.features.lookup(name)?;

        match (feature.is_scalar(), value) {
            (true, FeatureValue::Scalar(v)) => {
                if v.value_type() != feature.value_type() {
                    return Err(RtdcError::TypeMismatch {
                        name: name.to_string(),
                        expected: feature.value_type(),
                        actual: v.value_type(),
                    });
                }
                Ok(ShapeSignature::scalar())
            }
            (true, FeatureValue::Array(array)) => Err(RtdcError::ShapeMismatch {
                name: name.to_string(),
                expected: "scalar".to_string(),
                actual: format!("array of shape {:?}", array.shape()),
            }),
            (false, FeatureValue::Scalar(_)) => Err(RtdcError::ShapeMismatch {
                name: name.to_string(),
                expected: format!("{}-D array per event", feature.dims().len()),
                actual: "scalar".to_string(),
            }),
            (false, FeatureValue::Array(array)) => {
                if array.dtype() != feature.value_type() {
                    return Err(RtdcError::TypeMismatch {
                        name: name.to_string(),
                        expected: feature.value_type(),
                        actual: array.dtype(),
                    });
                }
                check_shape(feature, array.shape(), established)
            }
        }
    }

    /// Validate a whole batch column for feature `name`
    ///
    /// Returns the signature after the column, or `None` for an empty
    /// non-scalar column with no established signature.
    pub fn validate_column(
        &self,
        name: &str,
        column: &FeatureColumn,
        established: Option<&ShapeSignature>,
    ) -> Result<Option<ShapeSignature>> {
        match column {
            FeatureColumn::Scalars(data) => {
                let feature = self.features.lookup(name)?;
                if !feature.is_scalar() {
                    return Err(RtdcError::ShapeMismatch {
                        name: name.to_string(),
                        expected: format!("{}-D array per event", feature.dims().len()),
                        actual: "scalar column".to_string(),
                    });
                }
                if data.dtype() != feature.value_type() {
                    return Err(RtdcError::TypeMismatch {
                        name: name.to_string(),
                        expected: feature.value_type(),
                        actual: data.dtype(),
                    });
                }
                Ok(Some(ShapeSignature::scalar()))
            }
            FeatureColumn::Entries(entries) => {
                // Unknown names must fail even for empty columns
                self.features.lookup(name)?;
                let mut signature = established.cloned();
                for entry in entries {
                    signature = Some(self.validate_feature_value(
                        name,
                        FeatureValue::Array(entry),
                        signature.as_ref(),
                    )?);
                }
                Ok(signature)
            }
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Validate a metadata value, returning it conformed to the key's type
    pub fn validate_metadata(&self, section: &str, key: &str, value: &Value) -> Result<Value> {
        self.metadata.lookup(section, key)?.conform(value)
    }
}

fn check_shape(
    feature: &Feature,
    shape: &[usize],
    established: Option<&ShapeSignature>,
) -> Result<ShapeSignature> {
    let declared = feature.dims();
    let mismatch = |expected: String| RtdcError::ShapeMismatch {
        name: feature.name().to_string(),
        expected,
        actual: format!("{:?}", shape),
    };

    if shape.len() != declared.len() {
        return Err(mismatch(format!("{}-D array per event", declared.len())));
    }

    for (spec, n) in declared.iter().zip(shape) {
        if let DimSpec::Exact(m) = spec {
            if m != n {
                return Err(mismatch(format!("{}", ShapeSignature::infer(feature, shape))));
            }
        }
    }

    match established {
        Some(signature) if signature.accepts(shape) => Ok(signature.clone()),
        Some(signature) => Err(mismatch(signature.to_string())),
        None => Ok(ShapeSignature::infer(feature, shape)),
    }
}
