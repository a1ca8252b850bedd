//! # rtdc
//!
//! Schema-validated, append-only writer for real-time deformability
//! cytometry measurement containers:
//! - Compiled-in feature registry and metadata schema
//! - Pure validation of feature values and metadata
//! - Streaming sessions with all-or-nothing batch appends
//! - Crash-safe single-file backend with torn-tail recovery
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Acquisition Pipeline                        │
//! │              (bounded channel, writer thread)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  ContainerSession                            │
//! │        (Open → Writing → Finalized | Failed)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Validator  │          │   Storage   │
//!   │  (pure)     │          │  (backend)  │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!    ┌─────┴──────┐          ┌──────┴──────┐
//!    ▼            ▼          ▼             ▼
//! Registry     Schema      Memory        File
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod value;

pub mod registry;
pub mod schema;
pub mod validate;
pub mod storage;
pub mod writer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, RtdcError};
pub use config::{Config, SyncStrategy};
pub use value::{ArrayData, NdArray, Value, ValueType};
pub use registry::{Feature, FeatureKind, FeatureRegistry};
pub use schema::{MetadataKey, MetadataSchema};
pub use validate::{FeatureValue, SchemaValidator, ShapeSignature};
pub use storage::{ContainerHandle, FileBackend, MemoryBackend, StorageBackend};
pub use writer::{
    AcquisitionPipeline, ContainerSession, ContainerSummary, EventBatch, EventValue, OpenMode,
    SessionState,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of rtdc
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
