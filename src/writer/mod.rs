//! Writer Module
//!
//! Streaming, schema-validated writes into one container.
//!
//! ## Responsibilities
//! - Group per-feature values into length-consistent batches
//! - Track metadata and reject conflicting redeclarations
//! - Drive the session state machine (open, write, finalize, fail)
//! - Hand batches from an acquisition loop to a single writer thread
//!
//! ## Write Path
//! ```text
//! EventBatch ──▶ SchemaValidator ──▶ Chunk per feature ──▶ append_batch
//!                (every column,       (fixed or ragged      (one unit;
//!                 nothing written      layout)               counters and
//!                 on failure)                                lengths checked)
//! ```

mod batch;
mod pipeline;
mod session;
mod store;

pub use batch::{EventBatch, EventValue, FeatureColumn};
pub use pipeline::{AcquisitionPipeline, PipelineReport};
pub use session::{
    ContainerSession, ContainerSummary, OpenMode, SessionState, EVENT_COUNT_KEY,
    EVENT_COUNT_SECTION,
};
pub use store::{MetadataStore, MetadataUpdate};
