//! Configuration for rtdc
//!
//! Centralized configuration with sensible defaults.

/// Main configuration for container writing
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Backend Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often the file backend fsyncs records
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Session Configuration
    // -------------------------------------------------------------------------
    /// Re-validate every dataset entry and attribute when a container is
    /// reopened in append mode (one full read of the container)
    pub verify_on_append: bool,

    /// Mark the container read-only when the session is finalized
    pub read_only_on_finalize: bool,

    /// Record `experiment:event count` at finalize if the schema defines it
    pub record_event_count: bool,

    // -------------------------------------------------------------------------
    // Pipeline Configuration
    // -------------------------------------------------------------------------
    /// Max queued messages before the acquisition side blocks
    pub pipeline_capacity: usize,
}

/// Record sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every record (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced records (balanced durability/performance)
    EveryNRecords { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_strategy: SyncStrategy::EveryNRecords { count: 64 },
            verify_on_append: true,
            read_only_on_finalize: true,
            record_event_count: true,
            pipeline_capacity: 16,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the record sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Enable or disable full re-validation in append mode
    pub fn verify_on_append(mut self, verify: bool) -> Self {
        self.config.verify_on_append = verify;
        self
    }

    /// Enable or disable read-only marking at finalize
    pub fn read_only_on_finalize(mut self, read_only: bool) -> Self {
        self.config.read_only_on_finalize = read_only;
        self
    }

    /// Enable or disable recording the event count at finalize
    pub fn record_event_count(mut self, record: bool) -> Self {
        self.config.record_event_count = record;
        self
    }

    /// Set the pipeline queue depth (minimum 1)
    pub fn pipeline_capacity(mut self, capacity: usize) -> Self {
        self.config.pipeline_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
