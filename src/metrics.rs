//! Hub self-instrumentation
//!
//! Plain atomic counters shared by the background tasks, rendered as
//! exposition text by the server's `/metrics` handler. Counting is
//! lock-free and never fails; a counter increment is the error-handling
//! policy for contained failures (bad line, down target, unreachable
//! store).

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters incremented across the hub
#[derive(Debug, Default)]
pub struct HubMetrics {
    /// Samples appended to the store
    pub samples_appended: AtomicU64,

    /// Malformed exposition lines skipped
    pub line_errors: AtomicU64,

    /// Successful scrapes
    pub scrapes_ok: AtomicU64,

    /// Failed scrapes (timeout, non-2xx, transport)
    pub scrapes_failed: AtomicU64,

    /// Store operations abandoned on error
    pub storage_errors: AtomicU64,

    /// Rollup buckets written
    pub buckets_written: AtomicU64,

    /// Raw points removed by retention
    pub points_pruned: AtomicU64,

    /// Queries served (including empty results)
    pub queries_served: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Samples appended to the store
    pub samples_appended: u64,
    /// Malformed exposition lines skipped
    pub line_errors: u64,
    /// Successful scrapes
    pub scrapes_ok: u64,
    /// Failed scrapes
    pub scrapes_failed: u64,
    /// Store operations abandoned on error
    pub storage_errors: u64,
    /// Rollup buckets written
    pub buckets_written: u64,
    /// Raw points removed by retention
    pub points_pruned: u64,
    /// Queries served
    pub queries_served: u64,
}

impl HubMetrics {
    /// Bump a counter by one
    pub fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump a counter by `n`
    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read every counter at once
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_appended: self.samples_appended.load(Ordering::Relaxed),
            line_errors: self.line_errors.load(Ordering::Relaxed),
            scrapes_ok: self.scrapes_ok.load(Ordering::Relaxed),
            scrapes_failed: self.scrapes_failed.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            buckets_written: self.buckets_written.load(Ordering::Relaxed),
            points_pruned: self.points_pruned.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
        }
    }
}
