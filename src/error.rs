//! Error types for rtdc
//!
//! Provides a unified error type for all operations.
//!
//! Validation errors are recoverable: the container is untouched and the
//! caller may retry with corrected input. Backend and internal errors move
//! the writing session into its `Failed` state.

use std::path::PathBuf;

use thiserror::Error;

use crate::value::{Value, ValueType};

/// Result type alias using RtdcError
pub type Result<T> = std::result::Result<T, RtdcError>;

/// Unified error type for rtdc operations
#[derive(Debug, Error)]
pub enum RtdcError {
    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Unknown metadata section: {0}")]
    UnknownSection(String),

    #[error("Unknown metadata key: {section}:{key}")]
    UnknownKey { section: String, key: String },

    #[error("Type mismatch for {name}: expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: ValueType,
        actual: ValueType,
    },

    #[error("Shape mismatch for {name}: expected {expected}, got {actual}")]
    ShapeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid value for {section}:{key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },

    #[error("Batch length mismatch for {name}: expected {expected} events, got {actual}")]
    BatchLengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Batch does not match the session feature set (missing: {missing:?}, unexpected: {unexpected:?})")]
    FeatureSetMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    // -------------------------------------------------------------------------
    // Metadata Errors
    // -------------------------------------------------------------------------
    #[error("Metadata conflict for {section}:{key}: already set to {existing}, refusing {proposed}")]
    MetadataConflict {
        section: String,
        key: String,
        existing: Value,
        proposed: Value,
    },

    #[error("Required metadata missing: {}", missing.join(", "))]
    IncompleteMetadata { missing: Vec<String> },

    // -------------------------------------------------------------------------
    // Session Errors
    // -------------------------------------------------------------------------
    #[error("Session is finalized, no further writes are permitted")]
    SessionClosed,

    #[error("Session has failed, only close_discard is permitted")]
    SessionFailed,

    #[error("Container already exists: {0}")]
    ContainerExists(PathBuf),

    #[error("Container not found: {0}")]
    ContainerNotFound(PathBuf),

    #[error("Container is held open by another handle: {0}")]
    ContainerBusy(PathBuf),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("Backend IO error: {0}")]
    BackendIo(#[from] std::io::Error),

    #[error("Container corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Internal Errors
    // -------------------------------------------------------------------------
    #[error("Internal consistency error: {0}")]
    InternalConsistency(String),

    #[error("Registry error: {0}")]
    Registry(String),

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    #[error("Pipeline closed: {0}")]
    PipelineClosed(String),
}

impl RtdcError {
    /// True for errors that left the container untouched and can be retried
    /// on the same session with corrected input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RtdcError::UnknownFeature(_)
                | RtdcError::UnknownSection(_)
                | RtdcError::UnknownKey { .. }
                | RtdcError::TypeMismatch { .. }
                | RtdcError::ShapeMismatch { .. }
                | RtdcError::InvalidValue { .. }
                | RtdcError::BatchLengthMismatch { .. }
                | RtdcError::FeatureSetMismatch { .. }
                | RtdcError::IncompleteMetadata { .. }
        )
    }
}

impl From<bincode::Error> for RtdcError {
    fn from(err: bincode::Error) -> Self {
        RtdcError::Serialization(err.to_string())
    }
}
