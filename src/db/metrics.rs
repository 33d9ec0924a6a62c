//! Operation counters injected through [`super::DbOptions::metrics`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Operation counters for a [`crate::Db`].
///
/// Call sites increment counters explicitly; the collector is chosen at
/// open time through [`crate::DbOptions::metrics`], so nothing is shared
/// across handles unless the caller shares it.
pub trait OpMetrics: Send + Sync {
    /// A point read ran; `found` tells whether it hit.
    fn get(&self, found: bool);

    /// A write operation committed.
    fn set(&self);

    /// A delete operation committed.
    fn delete(&self);

    /// A scan was opened.
    fn scan(&self);

    /// An engine write failed at commit.
    fn commit_failed(&self);

    /// Text summary for [`crate::Db::info`]; `None` when nothing is kept.
    fn report(&self) -> Option<String> {
        None
    }
}

/// Discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl OpMetrics for NoopMetrics {
    fn get(&self, _found: bool) {}
    fn set(&self) {}
    fn delete(&self) {}
    fn scan(&self) {}
    fn commit_failed(&self) {}
}

/// Atomic counters with a plain-text report.
#[derive(Default)]
pub struct CounterMetrics {
    /// Point reads.
    pub gets: AtomicU64,
    /// Point reads that found nothing.
    pub empty_gets: AtomicU64,
    /// Committed writes.
    pub sets: AtomicU64,
    /// Committed deletes.
    pub deletes: AtomicU64,
    /// Opened scans.
    pub scans: AtomicU64,
    /// Failed commits.
    pub commit_failures: AtomicU64,
}

impl CounterMetrics {
    /// One `name: value` line per counter.
    pub fn summary(&self) -> String {
        format!(
            "gets: {}\nempty.gets: {}\nsets: {}\ndeletes: {}\nscans: {}\ncommit.failures: {}",
            self.gets.load(Ordering::Relaxed),
            self.empty_gets.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            self.scans.load(Ordering::Relaxed),
            self.commit_failures.load(Ordering::Relaxed),
        )
    }
}

impl OpMetrics for CounterMetrics {
    fn get(&self, found: bool) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if !found {
            self.empty_gets.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    fn scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    fn commit_failed(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self) -> Option<String> {
        Some(self.summary())
    }
}

/// The collector used when none is configured.
pub fn default_metrics() -> Arc<dyn OpMetrics> {
    Arc::new(NoopMetrics)
}
