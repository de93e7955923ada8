//! Time-series store
//!
//! Persists metric samples as compact time series in a score-ordered
//! external store and serves range reads back to the aggregation and query
//! engines.
//!
//! # Storage Model
//!
//! One sorted set per series, score = timestamp in unix milliseconds,
//! member = `"{ts}:{value}"`. Appending at an exact existing timestamp
//! replaces the tie (last-write-wins). Rollup buckets live in their own
//! sorted sets keyed by `(window, series)` with per-window retention.
//!
//! # Implementations
//!
//! - [`RedisStore`] — the production backend (Redis sorted sets)
//! - [`MemoryStore`] — in-process backend for tests and local development
//!
//! The [`Store`] trait is the seam: scheduler, aggregation engine, query
//! engine and retention job all take `Arc<dyn Store>` and never touch the
//! backend directly.

pub mod connection;
pub mod key;
pub mod memory;
pub mod redis;

pub use self::connection::{PoolCounters, RedisConfig, RedisPool, RetryPolicy};
pub use self::key::{canonical_encoding, series_key};
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{
    AggregationBucket, AggregationWindow, DataPoint, MetricSample, SeriesDescriptor, SeriesKey,
};

/// Storage seam shared by every background task and the query engine
///
/// All operations are atomic per series key; different keys never contend.
/// Implementations return [`StorageError`] when the backend is unreachable;
/// callers log, count and continue with the next unit of work.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append one sample, deriving its series key from name and labels
    ///
    /// An append with an exact existing timestamp replaces the old value
    /// (last-write-wins). Refreshes the series' raw-retention expiry.
    async fn append(&self, sample: &MetricSample) -> Result<SeriesKey, StorageError>;

    /// Read points with `from_ms <= timestamp < to_ms`, ascending
    async fn range(
        &self,
        key: SeriesKey,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<DataPoint>, StorageError>;

    /// Drop points older than `before_ms`; returns the number removed
    ///
    /// A series left empty by pruning is deleted outright, including its
    /// descriptor, to bound catalog growth.
    async fn prune(&self, key: SeriesKey, before_ms: i64) -> Result<u64, StorageError>;

    /// All known series with their descriptors
    async fn series(&self) -> Result<Vec<SeriesDescriptor>, StorageError>;

    /// Known series for one metric name
    async fn series_for(&self, name: &str) -> Result<Vec<SeriesDescriptor>, StorageError>;

    /// Write one rollup bucket with the window's retention TTL
    ///
    /// Writing the same `(series, window, bucket_start)` twice replaces the
    /// record, so recomputation after a crash is safe.
    async fn write_bucket(
        &self,
        bucket: &AggregationBucket,
        ttl: Duration,
    ) -> Result<(), StorageError>;

    /// Read back one rollup bucket, if present
    async fn read_bucket(
        &self,
        key: SeriesKey,
        window: AggregationWindow,
        bucket_start: i64,
    ) -> Result<Option<AggregationBucket>, StorageError>;

    /// Backend reachability, served by the health endpoint
    async fn healthy(&self) -> bool;
}
