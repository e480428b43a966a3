//! Counters for the ranking core
//!
//! Plain atomics, cheap enough to bump on every hot-path operation.
//! A `snapshot()` gives a consistent-enough view for health endpoints
//! and tests; exact cross-counter consistency is not needed.

use std::sync::atomic::{AtomicU64, Ordering};

/// Core counters for the ranking and fan-out subsystem.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    // Update pipeline
    pub deltas_applied: AtomicU64,
    pub deltas_rejected: AtomicU64,
    pub commit_retries: AtomicU64,
    pub repairs_scheduled: AtomicU64,
    pub repairs_abandoned: AtomicU64,

    // Fan-out
    pub events_published: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub connections_dropped: AtomicU64,

    // Snapshot cache
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_invalidations: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub deltas_applied: u64,
    pub deltas_rejected: u64,
    pub commit_retries: u64,
    pub repairs_scheduled: u64,
    pub repairs_abandoned: u64,
    pub events_published: u64,
    pub frames_delivered: u64,
    pub frames_skipped: u64,
    pub connections_dropped: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_invalidations: u64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deltas_applied: self.deltas_applied.load(Ordering::Relaxed),
            deltas_rejected: self.deltas_rejected.load(Ordering::Relaxed),
            commit_retries: self.commit_retries.load(Ordering::Relaxed),
            repairs_scheduled: self.repairs_scheduled.load(Ordering::Relaxed),
            repairs_abandoned: self.repairs_abandoned.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            connections_dropped: self.connections_dropped.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_invalidations: self.cache_invalidations.load(Ordering::Relaxed),
        }
    }
}
