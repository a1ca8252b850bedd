//! Feature Registry Module
//!
//! Authoritative catalog of the feature names a container may hold.
//!
//! ## Responsibilities
//! - Map feature names to their kind, element type and rank
//! - Enumerate features in stable (lexical) order
//! - Provide the compiled-in catalog of the standard instrument features
//!
//! A registry is immutable once built. There is no runtime mutation API:
//! adding a feature means adding it to the catalog (or building a scoped
//! registry, e.g. in tests) and passing that registry to the validator.
//!
//! ## Rank
//! ```text
//! Scalar   rank 0   one value per event          dataset (N,)
//! Trace    rank 2   1-D samples per event        dataset (N, T)
//! Image    rank 3   2-D pixels per event         dataset (N, A, B)
//! Contour  rank 3   C x 2 points per event       dataset (N, C_i, 2), ragged
//! ```

mod catalog;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::error::{Result, RtdcError};
use crate::value::ValueType;

static STANDARD: LazyLock<Arc<FeatureRegistry>> =
    LazyLock::new(|| Arc::new(FeatureRegistry::from_trusted(catalog::standard_features())));

/// Kind of a feature stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Scalar,
    Image,
    Contour,
    Trace,
}

impl FeatureKind {
    pub fn is_scalar(self) -> bool {
        matches!(self, FeatureKind::Scalar)
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeatureKind::Scalar => "scalar",
            FeatureKind::Image => "image",
            FeatureKind::Contour => "contour",
            FeatureKind::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// Declared extent of one per-event dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimSpec {
    /// Any extent, fixed by the first write of a session
    Any,
    /// Extent may differ from event to event
    Variable,
    /// Always exactly this extent
    Exact(usize),
}

/// A registered feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    name: String,
    kind: FeatureKind,
    value_type: ValueType,
    rank: u8,
    dims: Vec<DimSpec>,
    description: String,
}

impl Feature {
    /// A scalar feature: one value per event
    pub fn scalar(name: impl Into<String>, value_type: ValueType, description: &str) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Scalar,
            value_type,
            rank: 0,
            dims: Vec::new(),
            description: description.to_string(),
        }
    }

    /// A 2-D image per event; the image size is fixed per container
    pub fn image(name: impl Into<String>, value_type: ValueType, description: &str) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Image,
            value_type,
            rank: 3,
            dims: vec![DimSpec::Any, DimSpec::Any],
            description: description.to_string(),
        }
    }

    /// A `C x 2` point list per event, with C varying between events
    pub fn contour(name: impl Into<String>, value_type: ValueType, description: &str) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Contour,
            value_type,
            rank: 3,
            dims: vec![DimSpec::Variable, DimSpec::Exact(2)],
            description: description.to_string(),
        }
    }

    /// A 1-D trace per event; the trace length is fixed per container
    pub fn trace(name: impl Into<String>, value_type: ValueType, description: &str) -> Self {
        Self {
            name: name.into(),
            kind: FeatureKind::Trace,
            value_type,
            rank: 2,
            dims: vec![DimSpec::Any],
            description: description.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Rank of the stored dataset (0 for scalars)
    pub fn rank(&self) -> u8 {
        self.rank
    }

    /// Declared per-event dimensions (empty for scalars)
    pub fn dims(&self) -> &[DimSpec] {
        &self.dims
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_scalar(&self) -> bool {
        self.kind.is_scalar()
    }

    /// True if events may carry differently shaped entries
    pub fn is_ragged(&self) -> bool {
        self.dims.iter().any(|d| matches!(d, DimSpec::Variable))
    }
}

/// Closed catalog of valid features, ordered by name
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    features: BTreeMap<String, Feature>,
}

impl FeatureRegistry {
    /// Build a registry, rejecting duplicate or empty names and
    /// non-scalar features without array element types
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for feature in features {
            if feature.name.is_empty() {
                return Err(RtdcError::Registry("feature name must not be empty".to_string()));
            }
            if feature.value_type == ValueType::Str {
                return Err(RtdcError::Registry(format!(
                    "feature {} cannot have element type str",
                    feature.name
                )));
            }
            if let Some(previous) = map.insert(feature.name.clone(), feature) {
                return Err(RtdcError::Registry(format!(
                    "duplicate feature: {}",
                    previous.name
                )));
            }
        }
        Ok(Self { features: map })
    }

    /// The compiled-in catalog of standard instrument features
    pub fn standard() -> Arc<FeatureRegistry> {
        Arc::clone(&STANDARD)
    }

    fn from_trusted(features: Vec<Feature>) -> Self {
        Self {
            features: features.into_iter().map(|f| (f.name.clone(), f)).collect(),
        }
    }

    /// Look up a feature by name
    pub fn lookup(&self, name: &str) -> Result<&Feature> {
        self.features
            .get(name)
            .ok_or_else(|| RtdcError::UnknownFeature(name.to_string()))
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// All features in lexical name order
    pub fn all(&self) -> impl Iterator<Item = &Feature> {
        self.features.values()
    }

    pub fn scalars(&self) -> impl Iterator<Item = &Feature> {
        self.all().filter(|f| f.is_scalar())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
