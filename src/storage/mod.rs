//! Storage Module
//!
//! The container backend seen by the writer: named, appendable datasets plus
//! `section:key` attributes.
//!
//! ## Responsibilities
//! - Append chunks of events to per-feature datasets
//! - Keep each dataset's element type and per-event layout consistent
//! - Store and return metadata attributes
//! - Flush, seal (optionally read-only) and close containers
//!
//! ## Logical Layout
//! ```text
//! container
//! ├── datasets (one per feature, flat namespace)
//! │   ├── area_um    float64  Fixed []        (N,)
//! │   ├── image      uint8    Fixed [A, B]    (N, A, B)
//! │   └── contour    int64    Ragged ndim=2   N entries of (C_i, 2)
//! └── attributes
//!     ├── setup:channel width = 20.0
//!     └── imaging:frame rate  = 2000.0
//! ```
//!
//! Ragged datasets keep a per-event shape side-channel (`Entries::Ragged`),
//! fixed datasets store a single per-event shape.

mod file;
mod memory;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RtdcError};
use crate::value::{element_count, ArrayData, NdArray, Value, ValueType};

pub use file::{FileBackend, FileHandle, RecoveryReport};
pub use memory::{ContainerSnapshot, MemoryBackend, MemoryHandle};

// =============================================================================
// Chunks
// =============================================================================

/// Per-event shape bookkeeping of a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entries {
    /// `count` events sharing one shape (empty shape for scalars)
    Fixed { count: u64, shape: Vec<usize> },

    /// One shape per event
    Ragged { shapes: Vec<Vec<usize>> },
}

impl Entries {
    /// Number of events
    pub fn len(&self) -> u64 {
        match self {
            Entries::Fixed { count, .. } => *count,
            Entries::Ragged { shapes } => shapes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of elements covered by all events, or `None` on overflow
    fn element_count(&self) -> Option<usize> {
        match self {
            Entries::Fixed { count, shape } => {
                usize::try_from(*count).ok()?.checked_mul(element_count(shape)?)
            }
            Entries::Ragged { shapes } => shapes
                .iter()
                .try_fold(0usize, |acc, s| acc.checked_add(element_count(s)?)),
        }
    }
}

/// Dataset layout: the part of a chunk's entries that must never change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    Fixed(Vec<usize>),
    Ragged { ndim: usize },
}

/// A run of consecutive events for one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    data: ArrayData,
    entries: Entries,
}

impl Chunk {
    /// Create a chunk, checking that `entries` covers exactly the elements of `data`
    pub fn new(data: ArrayData, entries: Entries) -> Result<Self> {
        if let Entries::Ragged { shapes } = &entries {
            if let Some(first) = shapes.first() {
                if shapes.iter().any(|s| s.len() != first.len()) {
                    return Err(RtdcError::ShapeMismatch {
                        name: "chunk".to_string(),
                        expected: format!("{}-D entries", first.len()),
                        actual: "entries of mixed rank".to_string(),
                    });
                }
            }
        }
        let expected = entries.element_count().ok_or_else(|| RtdcError::ShapeMismatch {
            name: "chunk".to_string(),
            expected: "entries whose element count fits in usize".to_string(),
            actual: format!("{} entries", entries.len()),
        })?;
        if expected != data.len() {
            return Err(RtdcError::ShapeMismatch {
                name: "chunk".to_string(),
                expected: format!("{} elements", expected),
                actual: format!("{} elements", data.len()),
            });
        }
        Ok(Self { data, entries })
    }

    /// One scalar per element of `data`
    pub fn scalars(data: ArrayData) -> Self {
        let count = data.len() as u64;
        Self {
            data,
            entries: Entries::Fixed { count, shape: Vec::new() },
        }
    }

    /// Stack same-shaped arrays into a fixed-layout chunk
    pub fn fixed(dtype: ValueType, arrays: &[NdArray]) -> Result<Self> {
        let shape = arrays.first().map(|a| a.shape().to_vec()).unwrap_or_default();
        if let Some(bad) = arrays.iter().find(|a| a.shape() != shape.as_slice()) {
            return Err(RtdcError::ShapeMismatch {
                name: "chunk".to_string(),
                expected: format!("{:?}", shape),
                actual: format!("{:?}", bad.shape()),
            });
        }
        let data = concat(dtype, arrays)?;
        Self::new(
            data,
            Entries::Fixed {
                count: arrays.len() as u64,
                shape,
            },
        )
    }

    /// Concatenate arrays of differing shapes into a ragged chunk
    pub fn ragged(dtype: ValueType, arrays: &[NdArray]) -> Result<Self> {
        let shapes = arrays.iter().map(|a| a.shape().to_vec()).collect();
        let data = concat(dtype, arrays)?;
        Self::new(data, Entries::Ragged { shapes })
    }

    /// Number of events
    pub fn len(&self) -> u64 {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dtype(&self) -> ValueType {
        self.data.dtype()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn entries(&self) -> &Entries {
        &self.entries
    }

    pub fn layout(&self) -> Layout {
        match &self.entries {
            Entries::Fixed { shape, .. } => Layout::Fixed(shape.clone()),
            Entries::Ragged { shapes } => Layout::Ragged {
                ndim: shapes.first().map(|s| s.len()).unwrap_or(0),
            },
        }
    }

    /// Element `index` of a scalar chunk
    pub fn scalar_at(&self, index: usize) -> Option<Value> {
        match &self.entries {
            Entries::Fixed { shape, .. } if shape.is_empty() => self.data.value_at(index),
            _ => None,
        }
    }

    /// Split the chunk back into one array per event
    pub fn to_arrays(&self) -> Result<Vec<NdArray>> {
        let shapes: Vec<Vec<usize>> = match &self.entries {
            Entries::Fixed { count, shape } => vec![shape.clone(); *count as usize],
            Entries::Ragged { shapes } => shapes.clone(),
        };
        let mut arrays = Vec::with_capacity(shapes.len());
        let mut offset: usize = 0;
        for shape in shapes {
            let end = element_count(&shape).and_then(|size| offset.checked_add(size));
            let data = end
                .and_then(|end| self.data.slice(offset..end))
                .ok_or_else(|| {
                    RtdcError::Corruption(format!(
                        "chunk data ends before entry at element {}",
                        offset
                    ))
                })?;
            let size = data.len();
            arrays.push(NdArray::new(shape, data)?);
            offset += size;
        }
        Ok(arrays)
    }

    /// Append the events of `other` (same dtype and layout)
    pub fn extend(&mut self, other: &Chunk) -> Result<()> {
        let compatible = match (&self.entries, &other.entries) {
            (Entries::Fixed { count, shape }, Entries::Fixed { shape: s, .. }) => {
                shape == s || *count == 0
            }
            (Entries::Ragged { .. }, Entries::Ragged { .. }) => true,
            _ => false,
        };
        if !compatible {
            return Err(RtdcError::ShapeMismatch {
                name: "chunk".to_string(),
                expected: format!("{:?}", self.layout()),
                actual: format!("{:?}", other.layout()),
            });
        }

        self.data.extend_from(&other.data)?;
        match (&mut self.entries, &other.entries) {
            (Entries::Fixed { count, shape }, Entries::Fixed { count: n, shape: s }) => {
                *count += n;
                *shape = s.clone();
            }
            (Entries::Ragged { shapes }, Entries::Ragged { shapes: more }) => {
                shapes.extend(more.iter().cloned());
            }
            _ => {}
        }
        Ok(())
    }
}

fn concat(dtype: ValueType, arrays: &[NdArray]) -> Result<ArrayData> {
    let mut data = ArrayData::empty(dtype).ok_or_else(|| {
        RtdcError::Registry(format!("{} has no array representation", dtype))
    })?;
    for array in arrays {
        data.extend_from(array.data())?;
    }
    Ok(data)
}

// =============================================================================
// Dataset Metadata
// =============================================================================

/// Element type, layout and length of a stored dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub dtype: ValueType,
    pub layout: Layout,
    pub len: u64,
}

impl DatasetInfo {
    /// Dataset created by its first chunk
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            dtype: chunk.dtype(),
            layout: chunk.layout(),
            len: chunk.len(),
        }
    }

    /// Check that `chunk` may be appended to dataset `name`
    pub fn check_append(&self, name: &str, chunk: &Chunk) -> Result<()> {
        if chunk.dtype() != self.dtype {
            return Err(RtdcError::TypeMismatch {
                name: name.to_string(),
                expected: self.dtype,
                actual: chunk.dtype(),
            });
        }
        let compatible = match (&self.layout, chunk.layout()) {
            // An empty ragged chunk carries no rank information
            (Layout::Ragged { .. }, Layout::Ragged { .. }) if chunk.is_empty() => true,
            (a, b) => *a == b,
        };
        if !compatible {
            return Err(RtdcError::ShapeMismatch {
                name: name.to_string(),
                expected: format!("{:?}", self.layout),
                actual: format!("{:?}", chunk.layout()),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Backend Traits
// =============================================================================

/// Creates and opens containers
pub trait StorageBackend {
    type Handle: ContainerHandle;

    /// Check whether a container exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Create a new, empty container; fails if `path` exists
    fn create(&self, path: &Path) -> Result<Self::Handle>;

    /// Open an existing container for appending
    fn open(&self, path: &Path) -> Result<Self::Handle>;
}

/// An open container
///
/// Handles are single-writer: all mutating calls take `&mut self`.
pub trait ContainerHandle {
    /// Append a chunk to dataset `name`, creating the dataset on first use
    fn append_dataset(&mut self, name: &str, chunk: &Chunk) -> Result<()>;

    /// Append several datasets as one unit
    ///
    /// The default appends one dataset at a time; backends that can commit
    /// the whole batch atomically override it.
    fn append_batch(&mut self, chunks: &[(String, Chunk)]) -> Result<()> {
        for (name, chunk) in chunks {
            self.append_dataset(name, chunk)?;
        }
        Ok(())
    }

    /// Number of events in dataset `name`, `None` if it does not exist
    fn get_dataset_length(&self, name: &str) -> Option<u64>;

    fn dataset_info(&self, name: &str) -> Option<DatasetInfo>;

    /// All dataset names in lexical order
    fn dataset_names(&self) -> Vec<String>;

    /// Read a whole dataset back as one chunk
    fn read_dataset(&self, name: &str) -> Result<Chunk>;

    fn set_attribute(&mut self, section: &str, key: &str, value: &Value) -> Result<()>;

    /// Attribute value, `None` if never set
    fn get_attribute(&self, section: &str, key: &str) -> Option<Value>;

    /// All attributes in (section, key) order
    fn attributes(&self) -> Vec<(String, String, Value)>;

    /// True if the container was sealed and not written since
    fn is_sealed(&self) -> bool;

    /// Push buffered writes to durable storage
    fn flush(&mut self) -> Result<()>;

    /// Mark the container complete, optionally read-only
    fn seal(&mut self, read_only: bool) -> Result<()>;

    /// Release the handle
    fn close(self) -> Result<()>
    where
        Self: Sized;
}
