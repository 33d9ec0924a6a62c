use std::fmt;
use std::sync::Arc;

use crate::binlog::BinlogConfig;
use crate::engine::SyncMode;
use crate::packed::MergeStrategy;

use super::metrics::{default_metrics, OpMetrics};

/// Options supplied when opening a [`super::Db`].
#[derive(Clone)]
pub struct DbOptions {
    /// Records retained by [`super::Db::reclaim_binlog`].
    pub binlog_capacity: u64,
    /// Whether writes stage binlog records.
    pub binlog_enabled: bool,
    /// Durability of the on-disk engines.
    pub sync_mode: SyncMode,
    /// Member lookup used by packed zset merges.
    pub merge_strategy: MergeStrategy,
    /// Operation counters.
    pub metrics: Arc<dyn OpMetrics>,
}

impl Default for DbOptions {
    fn default() -> Self {
        let binlog = BinlogConfig::default();
        Self {
            binlog_capacity: binlog.capacity,
            binlog_enabled: binlog.enabled,
            sync_mode: SyncMode::default(),
            merge_strategy: MergeStrategy::default(),
            metrics: default_metrics(),
        }
    }
}

impl fmt::Debug for DbOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbOptions")
            .field("binlog_capacity", &self.binlog_capacity)
            .field("binlog_enabled", &self.binlog_enabled)
            .field("sync_mode", &self.sync_mode)
            .field("merge_strategy", &self.merge_strategy)
            .finish_non_exhaustive()
    }
}

impl DbOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many binlog records are kept.
    pub fn binlog_capacity(mut self, records: u64) -> Self {
        self.binlog_capacity = records;
        self
    }

    /// Enables or disables binlog records.
    pub fn binlog_enabled(mut self, enabled: bool) -> Self {
        self.binlog_enabled = enabled;
        self
    }

    /// Sets the engine sync mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Sets the packed zset merge strategy.
    pub fn merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    /// Installs a metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn OpMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn binlog_config(&self) -> BinlogConfig {
        BinlogConfig {
            capacity: self.binlog_capacity,
            enabled: self.binlog_enabled,
        }
    }
}
