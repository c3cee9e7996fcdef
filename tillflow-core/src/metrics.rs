//! Counters for drops which are silent by design but must stay observable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A cheaply cloneable shared counter
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    /// Increment by one
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Drop counters of one running job. Clones share the underlying counters,
/// so a handle kept outside the job observes its progress.
#[derive(Debug, Clone, Default)]
pub struct JobMetrics {
    /// Payloads which did not decode and were dropped
    pub decode_errors: Counter,
    /// Events dropped as late by the global pipeline
    pub late_drops_global: Counter,
    /// Events dropped as late by the per-country pipeline
    pub late_drops_country: Counter,
}
