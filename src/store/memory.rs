//! In-process store for tests and local development
//!
//! Mirrors the Redis store's semantics (score-ordered points, last-write-wins
//! ties, delete-on-empty pruning, replace-on-rewrite buckets) over plain
//! `BTreeMap`s. TTLs are accepted and ignored; retention in this backend is
//! whatever the retention job prunes explicitly.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::key::series_key;
use super::Store;
use crate::error::StorageError;
use crate::types::{
    AggregationBucket, AggregationWindow, DataPoint, Labels, MetricSample, SeriesDescriptor,
    SeriesKey,
};

#[derive(Debug, Clone)]
struct SeriesEntry {
    name: String,
    labels: Labels,
    points: BTreeMap<i64, f64>,
}

/// In-memory [`Store`] implementation
#[derive(Default)]
pub struct MemoryStore {
    series: RwLock<HashMap<SeriesKey, SeriesEntry>>,
    buckets: RwLock<HashMap<(SeriesKey, AggregationWindow, i64), AggregationBucket>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of raw points across all series (test helper)
    pub fn point_count(&self) -> usize {
        self.series.read().values().map(|s| s.points.len()).sum()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append(&self, sample: &MetricSample) -> Result<SeriesKey, StorageError> {
        let key = series_key(&sample.name, &sample.labels);

        let mut series = self.series.write();
        let entry = series.entry(key).or_insert_with(|| SeriesEntry {
            name: sample.name.clone(),
            labels: sample.labels.clone(),
            points: BTreeMap::new(),
        });
        // BTreeMap insert is already last-write-wins on an exact timestamp
        entry.points.insert(sample.timestamp_ms, sample.value);

        Ok(key)
    }

    async fn range(
        &self,
        key: SeriesKey,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let series = self.series.read();
        let Some(entry) = series.get(&key) else {
            return Ok(Vec::new());
        };

        Ok(entry
            .points
            .range(from_ms..to_ms)
            .map(|(&timestamp, &value)| DataPoint { timestamp, value })
            .collect())
    }

    async fn prune(&self, key: SeriesKey, before_ms: i64) -> Result<u64, StorageError> {
        let mut series = self.series.write();
        let Some(entry) = series.get_mut(&key) else {
            return Ok(0);
        };

        let keep = entry.points.split_off(&before_ms);
        let removed = entry.points.len() as u64;
        entry.points = keep;

        if entry.points.is_empty() {
            series.remove(&key);
        }

        Ok(removed)
    }

    async fn series(&self) -> Result<Vec<SeriesDescriptor>, StorageError> {
        Ok(self
            .series
            .read()
            .iter()
            .map(|(&key, entry)| SeriesDescriptor {
                key,
                name: entry.name.clone(),
                labels: entry.labels.clone(),
            })
            .collect())
    }

    async fn series_for(&self, name: &str) -> Result<Vec<SeriesDescriptor>, StorageError> {
        Ok(self
            .series
            .read()
            .iter()
            .filter(|(_, entry)| entry.name == name)
            .map(|(&key, entry)| SeriesDescriptor {
                key,
                name: entry.name.clone(),
                labels: entry.labels.clone(),
            })
            .collect())
    }

    async fn write_bucket(
        &self,
        bucket: &AggregationBucket,
        _ttl: Duration,
    ) -> Result<(), StorageError> {
        self.buckets.write().insert(
            (bucket.series_key, bucket.window, bucket.bucket_start),
            bucket.clone(),
        );
        Ok(())
    }

    async fn read_bucket(
        &self,
        key: SeriesKey,
        window: AggregationWindow,
        bucket_start: i64,
    ) -> Result<Option<AggregationBucket>, StorageError> {
        Ok(self
            .buckets
            .read()
            .get(&(key, window, bucket_start))
            .cloned())
    }

    async fn healthy(&self) -> bool {
        true
    }
}
