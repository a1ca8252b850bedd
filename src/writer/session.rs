//! Container sessions
//!
//! A `ContainerSession` is the write handle bound to one output container.
//!
//! ## State Machine
//! ```text
//! Open ──▶ Writing ──▶ Finalized
//!   │         │
//!   ▼         ▼
//! Failed    Failed
//! ```
//!
//! - Validation errors leave the state unchanged; the caller may retry.
//! - Backend errors, metadata conflicts and broken invariants move the
//!   session to `Failed` and release the backend handle.
//! - After `Finalized` every write fails with `SessionClosed`, after
//!   `Failed` with `SessionFailed`.
//!
//! ## Invariants
//! Every dataset of the session's feature set has exactly `event_count`
//! entries after every successful `write_events`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Result, RtdcError};
use crate::registry::{DimSpec, Feature};
use crate::storage::{Chunk, ContainerHandle, DatasetInfo, Layout, StorageBackend};
use crate::validate::{Dim, SchemaValidator, ShapeSignature};
use crate::value::Value;

use super::batch::{EventBatch, FeatureColumn};
use super::store::{MetadataStore, MetadataUpdate};

/// Section and key of the event count recorded at finalize
pub const EVENT_COUNT_SECTION: &str = "experiment";
pub const EVENT_COUNT_KEY: &str = "event count";

// =============================================================================
// Modes and States
// =============================================================================

/// How `ContainerSession::open` treats the target path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new container; fails if one exists
    Create,

    /// Continue an existing container
    Append,
}

/// Runtime session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Writing,
    Finalized,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finalized | SessionState::Failed)
    }

    /// Error for any write attempted in this state, if one applies
    fn check_writable(self) -> Result<()> {
        match self {
            SessionState::Open | SessionState::Writing => Ok(()),
            SessionState::Finalized => Err(RtdcError::SessionClosed),
            SessionState::Failed => Err(RtdcError::SessionFailed),
        }
    }

    /// Validate a transition to `next`
    pub fn transition(self, next: SessionState) -> Result<SessionState> {
        use SessionState::*;
        match (self, next) {
            (Open, Open) | (Open, Writing) | (Writing, Writing) => Ok(next),
            (Open, Finalized) | (Writing, Finalized) => Ok(next),
            (Open, Failed) | (Writing, Failed) => Ok(next),
            (Failed, Failed) => Ok(next),
            (Finalized, _) => Err(RtdcError::SessionClosed),
            (Failed, _) => Err(RtdcError::SessionFailed),
            (from, to) => Err(RtdcError::InternalConsistency(format!(
                "illegal session transition {} -> {}",
                from, to
            ))),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "open",
            SessionState::Writing => "writing",
            SessionState::Finalized => "finalized",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a finalized container holds
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    pub path: PathBuf,
    pub event_count: u64,
    /// Length of every dataset, by feature name
    pub datasets: BTreeMap<String, u64>,
    pub metadata_keys: usize,
    pub read_only: bool,
}

// =============================================================================
// Session
// =============================================================================

/// Write session over one container
///
/// Not safe for concurrent writers: calls must be serialized by the caller
/// (see `AcquisitionPipeline` for a single writer thread).
pub struct ContainerSession<B: StorageBackend> {
    path: PathBuf,
    mode: OpenMode,
    state: SessionState,

    /// Backend handle; `None` once released
    handle: Option<B::Handle>,

    validator: SchemaValidator,
    config: Config,

    /// Features every batch must cover, once fixed
    features: Option<BTreeSet<String>>,

    /// Established per-event shape of each non-scalar feature
    signatures: BTreeMap<String, ShapeSignature>,

    /// Events written per feature
    counters: BTreeMap<String, u64>,

    event_count: u64,
    batches_written: u64,
    metadata: MetadataStore,
}

impl<B: StorageBackend> ContainerSession<B> {
    /// Open a session on `path`
    ///
    /// `Create` requires that nothing exists at `path`. `Append` reopens an
    /// existing container and adopts its feature set, shapes, event count and
    /// metadata; with `verify_on_append` every stored entry and attribute is
    /// re-validated first.
    pub fn open(
        backend: &B,
        path: impl AsRef<Path>,
        mode: OpenMode,
        validator: SchemaValidator,
        config: Config,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Step 1: Acquire the backend handle
        let handle = match mode {
            OpenMode::Create => {
                if backend.exists(&path) {
                    return Err(RtdcError::ContainerExists(path));
                }
                backend.create(&path)?
            }
            OpenMode::Append => {
                if !backend.exists(&path) {
                    return Err(RtdcError::ContainerNotFound(path));
                }
                backend.open(&path)?
            }
        };

        let mut session = Self {
            path,
            mode,
            state: SessionState::Open,
            handle: Some(handle),
            validator,
            config,
            features: None,
            signatures: BTreeMap::new(),
            counters: BTreeMap::new(),
            event_count: 0,
            batches_written: 0,
            metadata: MetadataStore::new(),
        };

        // Step 2: Adopt the existing container's state
        if mode == OpenMode::Append {
            if let Err(e) = session.adopt() {
                session.release();
                session.state = SessionState::Failed;
                return Err(e);
            }
        }

        tracing::info!(
            "Opened container {:?} ({:?}): {} events, {} metadata keys",
            session.path,
            mode,
            session.event_count,
            session.metadata.len()
        );

        Ok(session)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn validator(&self) -> &SchemaValidator {
        &self.validator
    }

    /// Number of events written (adopted ones included)
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }

    /// Events written for feature `name`
    pub fn feature_count(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    /// The feature set, once fixed
    pub fn feature_set(&self) -> Option<&BTreeSet<String>> {
        self.features.as_ref()
    }

    /// Established per-event shape of `name`
    pub fn signature(&self, name: &str) -> Option<&ShapeSignature> {
        self.signatures.get(name)
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Backend handle, while the session holds one
    pub fn handle(&self) -> Option<&B::Handle> {
        self.handle.as_ref()
    }

    /// Length of dataset `name` as reported by the backend
    pub fn dataset_length(&self, name: &str) -> Option<u64> {
        self.handle.as_ref()?.get_dataset_length(name)
    }

    /// Attribute as stored in the backend
    pub fn get_attribute(&self, section: &str, key: &str) -> Option<Value> {
        self.handle.as_ref()?.get_attribute(section, key)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Fix the feature set before the first batch
    pub fn declare_features<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.state.check_writable()?;

        let mut declared = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            self.validator.features().lookup(name)?;
            declared.insert(name.to_string());
        }

        match &self.features {
            Some(current) if *current != declared => Err(set_mismatch(current, &declared)),
            Some(_) => Ok(()),
            None => {
                tracing::debug!("Declared features {:?} for {:?}", declared, self.path);
                self.features = Some(declared);
                Ok(())
            }
        }
    }

    /// Validate and store one metadata value
    ///
    /// Setting a key again to an identical value is a no-op; a different
    /// value fails with `MetadataConflict` and the session fails.
    pub fn write_metadata(
        &mut self,
        section: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.state.check_writable()?;

        let value = self.validator.validate_metadata(section, key, &value.into())?;
        self.store_metadata(section, key, value)?;
        self.enter(SessionState::Writing)
    }

    /// Validate and append one batch, all or nothing
    pub fn write_events(&mut self, batch: &EventBatch) -> Result<()> {
        self.state.check_writable()?;

        // Step 1: Batch structure and feature set
        let count = batch.event_count()?;
        if batch.is_empty() {
            return Ok(());
        }
        let names: BTreeSet<String> = batch.names().map(str::to_string).collect();
        if let Some(expected) = &self.features {
            if *expected != names {
                return Err(set_mismatch(expected, &names));
            }
        }

        // Step 2: Validate every column and build its chunk; nothing is written yet
        let handle = self.handle.as_ref().ok_or(RtdcError::SessionFailed)?;
        let mut chunks = Vec::with_capacity(batch.len());
        let mut signatures = Vec::new();
        for (name, column) in batch.columns() {
            let signature = self
                .validator
                .validate_column(name, column, self.signatures.get(name))?;
            if count == 0 {
                continue;
            }
            let feature = self.validator.features().lookup(name)?;
            let chunk = column.to_chunk(feature)?;
            if let Some(info) = handle.dataset_info(name) {
                info.check_append(name, &chunk)?;
            }
            if let (Some(signature), false) = (signature, feature.is_scalar()) {
                signatures.push((name.to_string(), signature));
            }
            chunks.push((name.to_string(), chunk));
        }

        if count == 0 {
            return Ok(());
        }

        // Step 3: Append the whole batch
        let result = match self.handle.as_mut() {
            Some(handle) => handle.append_batch(&chunks),
            None => Err(RtdcError::SessionFailed),
        };
        if let Err(e) = result {
            return Err(self.fail(e));
        }

        // Step 4: Counters, then the invariant check
        if self.features.is_none() {
            self.features = Some(names);
        }
        self.signatures.extend(signatures);
        for (name, _) in &chunks {
            *self.counters.entry(name.clone()).or_insert(0) += count;
        }
        self.event_count += count;
        self.batches_written += 1;

        if let Err(e) = self.check_counters() {
            return Err(self.fail(e));
        }

        tracing::debug!(
            "Appended batch of {} events to {:?} (total {})",
            count,
            self.path,
            self.event_count
        );
        self.enter(SessionState::Writing)
    }

    /// Complete the container
    ///
    /// Fails with `IncompleteMetadata` (session stays open) if a required
    /// key is missing. Otherwise records the event count, flushes, seals and
    /// releases the container. A required event count key is satisfied by
    /// the recorded count.
    pub fn finalize(&mut self) -> Result<ContainerSummary> {
        self.state.check_writable()?;

        let records_count = self.config.record_event_count
            && self
                .validator
                .metadata()
                .lookup(EVENT_COUNT_SECTION, EVENT_COUNT_KEY)
                .is_ok();

        // Step 1: Required metadata
        let mut missing = self.metadata.missing_required(self.validator.metadata());
        if records_count {
            let count_key = format!("{}:{}", EVENT_COUNT_SECTION, EVENT_COUNT_KEY);
            missing.retain(|name| *name != count_key);
        }
        if !missing.is_empty() {
            return Err(RtdcError::IncompleteMetadata { missing });
        }

        // Step 2: Event count attribute
        if records_count {
            let count = Value::Int64(self.event_count as i64);
            let count = self
                .validator
                .validate_metadata(EVENT_COUNT_SECTION, EVENT_COUNT_KEY, &count)?;
            self.store_metadata(EVENT_COUNT_SECTION, EVENT_COUNT_KEY, count)?;
        }

        // Step 3: Flush, seal and release
        let read_only = self.config.read_only_on_finalize;
        let mut handle = self.handle.take().ok_or(RtdcError::SessionFailed)?;
        let sealed = handle.flush().and_then(|_| handle.seal(read_only));
        let datasets: BTreeMap<String, u64> = handle
            .dataset_names()
            .into_iter()
            .filter_map(|name| handle.get_dataset_length(&name).map(|len| (name, len)))
            .collect();
        let closed = handle.close();
        let released = match (sealed, closed) {
            (Err(e), Err(close)) => {
                tracing::warn!("Closing handle for {:?} failed: {}", self.path, close);
                Err(e)
            }
            (sealed, closed) => sealed.and(closed),
        };
        if let Err(e) = released {
            return Err(self.fail(e));
        }

        self.state = self.state.transition(SessionState::Finalized)?;

        tracing::info!(
            "Finalized container {:?}: {} events, {} datasets",
            self.path,
            self.event_count,
            datasets.len()
        );

        Ok(ContainerSummary {
            path: self.path.clone(),
            event_count: self.event_count,
            datasets,
            metadata_keys: self.metadata.len(),
            read_only,
        })
    }

    /// Abandon the session, releasing the backend handle
    ///
    /// The container is left as the backend has it and may be incomplete.
    /// This is the only call permitted on a failed session.
    pub fn close_discard(mut self) -> Result<()> {
        tracing::debug!("Discarding session on {:?} in state {}", self.path, self.state);
        match self.handle.take() {
            Some(handle) => handle.close(),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn enter(&mut self, next: SessionState) -> Result<()> {
        self.state = self.state.transition(next)?;
        Ok(())
    }

    /// Move to `Failed`, release the handle and hand the error back
    fn fail(&mut self, error: RtdcError) -> RtdcError {
        tracing::error!("Session on {:?} failed: {}", self.path, error);
        self.state = SessionState::Failed;
        self.release();
        error
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.close() {
                tracing::warn!("Closing handle for {:?} failed: {}", self.path, e);
            }
        }
    }

    /// Conflict check, backend write and store update for one conformed value
    fn store_metadata(&mut self, section: &str, key: &str, value: Value) -> Result<()> {
        match self.metadata.check(section, key, &value) {
            Ok(MetadataUpdate::Unchanged) => return Ok(()),
            Ok(MetadataUpdate::New) => {}
            Err(e) => return Err(self.fail(e)),
        }

        let result = match self.handle.as_mut() {
            Some(handle) => handle.set_attribute(section, key, &value),
            None => Err(RtdcError::SessionFailed),
        };
        if let Err(e) = result {
            return Err(self.fail(e));
        }

        tracing::debug!("Set {}:{} = {} on {:?}", section, key, value, self.path);
        self.metadata.insert(section, key, value);
        Ok(())
    }

    fn check_counters(&self) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(RtdcError::SessionFailed)?;
        for (name, count) in &self.counters {
            if *count != self.event_count {
                return Err(RtdcError::InternalConsistency(format!(
                    "feature {} has {} events, session has {}",
                    name, count, self.event_count
                )));
            }
            let stored = handle.get_dataset_length(name).unwrap_or(0);
            if stored != *count {
                return Err(RtdcError::InternalConsistency(format!(
                    "dataset {} has {} entries, session counted {}",
                    name, stored, count
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Append Mode
    // =========================================================================

    /// Read the container back and adopt it as the session's starting state
    fn adopt(&mut self) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(RtdcError::SessionFailed)?;
        let verify = self.config.verify_on_append;

        // Datasets: names, types and layouts, then (optionally) every entry
        let mut lengths = BTreeMap::new();
        for name in handle.dataset_names() {
            let feature = self.validator.features().lookup(&name)?;
            let info = handle
                .dataset_info(&name)
                .ok_or_else(|| RtdcError::Corruption(format!("dataset {} has no info", name)))?;
            let mut signature = layout_signature(feature, &info)?;

            if verify {
                let chunk = handle.read_dataset(&name)?;
                signature = self.verify_chunk(feature, &chunk, signature)?;
            }

            if let (Some(signature), false) = (signature, feature.is_scalar()) {
                self.signatures.insert(name.clone(), signature);
            }
            lengths.insert(name, info.len);
        }

        // Every feature stream must have one entry per event
        let mut distinct: BTreeSet<u64> = lengths.values().copied().collect();
        if distinct.len() > 1 {
            return Err(RtdcError::Corruption(format!(
                "container {:?} has unequal dataset lengths: {:?}",
                self.path, lengths
            )));
        }
        self.event_count = distinct.pop_first().unwrap_or(0);
        if !lengths.is_empty() {
            self.features = Some(lengths.keys().cloned().collect());
        }
        self.counters = lengths;

        // Attributes
        for (section, key, value) in handle.attributes() {
            let value = if verify {
                self.validator.validate_metadata(&section, &key, &value)?
            } else {
                self.validator.metadata().lookup(&section, &key)?;
                value
            };
            self.metadata.insert(&section, &key, value);
        }
        // Re-recorded at finalize
        if self.config.record_event_count {
            self.metadata.remove(EVENT_COUNT_SECTION, EVENT_COUNT_KEY);
        }

        if self.event_count > 0 || !self.metadata.is_empty() {
            self.state = SessionState::Writing;
        }
        Ok(())
    }

    /// Run every stored entry of `chunk` through the validator
    fn verify_chunk(
        &self,
        feature: &Feature,
        chunk: &Chunk,
        signature: Option<ShapeSignature>,
    ) -> Result<Option<ShapeSignature>> {
        let column = if feature.is_scalar() {
            FeatureColumn::Scalars(chunk.data().clone())
        } else {
            FeatureColumn::Entries(chunk.to_arrays()?)
        };
        self.validator
            .validate_column(feature.name(), &column, signature.as_ref())
    }
}

impl<B: StorageBackend> fmt::Debug for ContainerSession<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerSession")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("event_count", &self.event_count)
            .field("features", &self.features)
            .finish()
    }
}

impl<B: StorageBackend> Drop for ContainerSession<B> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::warn!(
                "Session on {:?} dropped in state {} without finalize; container left incomplete",
                self.path,
                self.state
            );
            self.release();
        }
    }
}

fn set_mismatch(expected: &BTreeSet<String>, actual: &BTreeSet<String>) -> RtdcError {
    RtdcError::FeatureSetMismatch {
        missing: expected.difference(actual).cloned().collect(),
        unexpected: actual.difference(expected).cloned().collect(),
    }
}

/// Shape signature implied by a stored dataset's layout
fn layout_signature(feature: &Feature, info: &DatasetInfo) -> Result<Option<ShapeSignature>> {
    if info.dtype != feature.value_type() {
        return Err(RtdcError::TypeMismatch {
            name: feature.name().to_string(),
            expected: feature.value_type(),
            actual: info.dtype,
        });
    }

    let declared = feature.dims();
    let mismatch = || RtdcError::ShapeMismatch {
        name: feature.name().to_string(),
        expected: format!("{} layout with {} per-event dims", feature.kind(), declared.len()),
        actual: format!("{:?}", info.layout),
    };

    match &info.layout {
        Layout::Fixed(shape) if feature.is_scalar() => {
            if !shape.is_empty() {
                return Err(mismatch());
            }
            Ok(Some(ShapeSignature::scalar()))
        }
        Layout::Fixed(shape) if !feature.is_ragged() => {
            if shape.len() != declared.len() {
                return Err(mismatch());
            }
            let mut dims = Vec::with_capacity(shape.len());
            for (spec, n) in declared.iter().zip(shape) {
                match spec {
                    DimSpec::Exact(m) if m != n => return Err(mismatch()),
                    _ => dims.push(Dim::Fixed(*n)),
                }
            }
            // An empty fixed dataset has not fixed its shape yet
            if info.len == 0 {
                return Ok(None);
            }
            Ok(Some(ShapeSignature::new(dims)))
        }
        Layout::Ragged { ndim } if feature.is_ragged() => {
            if info.len > 0 && *ndim != declared.len() {
                return Err(mismatch());
            }
            let dims: Option<Vec<Dim>> = declared
                .iter()
                .map(|spec| match spec {
                    DimSpec::Variable => Some(Dim::Variable),
                    DimSpec::Exact(m) => Some(Dim::Fixed(*m)),
                    DimSpec::Any => None,
                })
                .collect();
            Ok(dims.map(ShapeSignature::new))
        }
        _ => Err(mismatch()),
    }
}
