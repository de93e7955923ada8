//! Redis-backed time-series store
//!
//! # Redis Key Schema
//!
//! ```text
//! hub:registry                  → SET of all series keys (hex)
//! hub:series:{key}              → ZSET(timestamp_ms → "ts:value")
//! hub:series:{key}:info         → HASH {name, labels}
//! hub:metric:{name}             → SET of series keys with this name
//! hub:agg:{window}:{key}        → ZSET(bucket_start → bucket JSON)
//! ```
//!
//! Raw series and their info hashes carry the raw-retention TTL, refreshed
//! on every append. Rollup sets carry the per-window TTL, refreshed on
//! every bucket write. Appends and bucket writes replace any member at the
//! same score first, which gives last-write-wins ties and idempotent
//! re-aggregation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use super::connection::{RedisConfig, RedisPool};
use super::key::series_key;
use super::Store;
use crate::error::StorageError;
use crate::types::{
    AggregationBucket, AggregationWindow, DataPoint, Labels, MetricSample, SeriesDescriptor,
    SeriesKey,
};

const KEY_REGISTRY: &str = "hub:registry";
const KEY_SERIES_PREFIX: &str = "hub:series:";
const KEY_INFO_SUFFIX: &str = ":info";
const KEY_METRIC_PREFIX: &str = "hub:metric:";
const KEY_AGG_PREFIX: &str = "hub:agg:";

/// Batch size for descriptor pipeline fetches
const INFO_BATCH: usize = 100;

/// Production store over Redis sorted sets
pub struct RedisStore {
    pool: Arc<RedisPool>,
    raw_ttl: Duration,
}

impl RedisStore {
    /// Wrap an existing pool
    pub fn new(pool: RedisPool, raw_ttl: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            raw_ttl,
        }
    }

    /// Connect and build a store in one step
    pub async fn connect(config: RedisConfig, raw_ttl: Duration) -> Result<Self, StorageError> {
        let pool = RedisPool::connect(config).await?;
        Ok(Self::new(pool, raw_ttl))
    }

    /// The underlying pool, for counter export
    pub fn pool(&self) -> Arc<RedisPool> {
        Arc::clone(&self.pool)
    }

    fn series_data_key(key: SeriesKey) -> String {
        format!("{}{}", KEY_SERIES_PREFIX, key)
    }

    fn series_info_key(key: SeriesKey) -> String {
        format!("{}{}{}", KEY_SERIES_PREFIX, key, KEY_INFO_SUFFIX)
    }

    fn metric_index_key(name: &str) -> String {
        format!("{}{}", KEY_METRIC_PREFIX, name)
    }

    fn agg_key(window: AggregationWindow, key: SeriesKey) -> String {
        format!("{}{}:{}", KEY_AGG_PREFIX, window.label(), key)
    }

    /// Encode one point as a sorted-set member
    fn encode_member(timestamp: i64, value: f64) -> String {
        format!("{}:{}", timestamp, value)
    }

    /// Decode a sorted-set member back into a point
    fn decode_member(storage_key: &str, member: &str) -> Result<DataPoint, StorageError> {
        let corrupt = || StorageError::CorruptMember {
            key: storage_key.to_string(),
            member: member.to_string(),
        };

        let (ts, value) = member.split_once(':').ok_or_else(corrupt)?;
        Ok(DataPoint {
            timestamp: ts.parse().map_err(|_| corrupt())?,
            value: value.parse().map_err(|_| corrupt())?,
        })
    }

    /// Fetch descriptors for a list of series keys, pipelined in batches
    async fn fetch_descriptors(
        &self,
        keys: Vec<SeriesKey>,
    ) -> Result<Vec<SeriesDescriptor>, StorageError> {
        let mut out = Vec::with_capacity(keys.len());

        for batch in keys.chunks(INFO_BATCH) {
            let batch: Vec<SeriesKey> = batch.to_vec();
            let rows: Vec<(Option<String>, Option<String>)> = self
                .pool
                .execute(|mut conn| {
                    let batch = batch.clone();
                    async move {
                        let mut pipe = redis::pipe();
                        for key in &batch {
                            let info = Self::series_info_key(*key);
                            pipe.hget(&info, "name");
                            pipe.hget(&info, "labels");
                        }
                        pipe.query_async(&mut conn).await
                    }
                })
                .await?;

            for (key, (name, labels_json)) in batch.iter().zip(rows) {
                // A series whose info expired between SMEMBERS and here is
                // simply skipped; retention will collect the dangling entry.
                let (Some(name), Some(labels_json)) = (name, labels_json) else {
                    continue;
                };
                let labels: Labels = serde_json::from_str(&labels_json)
                    .map_err(|e| StorageError::Encoding(e.to_string()))?;
                out.push(SeriesDescriptor {
                    key: *key,
                    name,
                    labels,
                });
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn append(&self, sample: &MetricSample) -> Result<SeriesKey, StorageError> {
        let key = series_key(&sample.name, &sample.labels);

        let data_key = Self::series_data_key(key);
        let info_key = Self::series_info_key(key);
        let metric_idx = Self::metric_index_key(&sample.name);
        let member = Self::encode_member(sample.timestamp_ms, sample.value);
        let labels_json = serde_json::to_string(&sample.labels)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let ts = sample.timestamp_ms;
        let ttl_s = self.raw_ttl.as_secs() as i64;
        let name = sample.name.clone();
        let key_hex = key.to_string();

        self.pool
            .execute(|mut conn| {
                let data_key = data_key.clone();
                let info_key = info_key.clone();
                let metric_idx = metric_idx.clone();
                let member = member.clone();
                let labels_json = labels_json.clone();
                let name = name.clone();
                let key_hex = key_hex.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.zrembyscore(&data_key, ts, ts)
                        .ignore()
                        .zadd(&data_key, &member, ts)
                        .ignore()
                        .sadd(KEY_REGISTRY, &key_hex)
                        .ignore()
                        .sadd(&metric_idx, &key_hex)
                        .ignore()
                        .hset(&info_key, "name", &name)
                        .ignore()
                        .hset(&info_key, "labels", &labels_json)
                        .ignore()
                        .expire(&data_key, ttl_s)
                        .ignore()
                        .expire(&info_key, ttl_s)
                        .ignore();
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await?;

        Ok(key)
    }

    async fn range(
        &self,
        key: SeriesKey,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let data_key = Self::series_data_key(key);
        let max = format!("({}", to_ms);

        let members: Vec<String> = self
            .pool
            .execute(|mut conn| {
                let data_key = data_key.clone();
                let max = max.clone();
                async move { conn.zrangebyscore(&data_key, from_ms, &max).await }
            })
            .await?;

        members
            .iter()
            .map(|m| Self::decode_member(&data_key, m))
            .collect()
    }

    async fn prune(&self, key: SeriesKey, before_ms: i64) -> Result<u64, StorageError> {
        let data_key = Self::series_data_key(key);
        let max = format!("({}", before_ms);

        let (removed, remaining): (u64, u64) = self
            .pool
            .execute(|mut conn| {
                let data_key = data_key.clone();
                let max = max.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.zrembyscore(&data_key, "-inf", &max);
                    pipe.zcard(&data_key);
                    pipe.query_async(&mut conn).await
                }
            })
            .await?;

        if remaining == 0 {
            let info_key = Self::series_info_key(key);
            let key_hex = key.to_string();

            let name: Option<String> = self
                .pool
                .execute(|mut conn| {
                    let info_key = info_key.clone();
                    async move { conn.hget(&info_key, "name").await }
                })
                .await?;

            self.pool
                .execute(|mut conn| {
                    let data_key = data_key.clone();
                    let info_key = info_key.clone();
                    let key_hex = key_hex.clone();
                    let metric_idx = name.as_deref().map(Self::metric_index_key);
                    async move {
                        let mut pipe = redis::pipe();
                        pipe.del(&data_key).ignore();
                        pipe.del(&info_key).ignore();
                        pipe.srem(KEY_REGISTRY, &key_hex).ignore();
                        if let Some(idx) = metric_idx {
                            pipe.srem(&idx, &key_hex).ignore();
                        }
                        pipe.query_async::<()>(&mut conn).await
                    }
                })
                .await?;

            debug!(series = %key, "pruned series to empty, deleted");
        }

        Ok(removed)
    }

    async fn series(&self) -> Result<Vec<SeriesDescriptor>, StorageError> {
        let members: Vec<String> = self
            .pool
            .execute(|mut conn| async move { conn.smembers(KEY_REGISTRY).await })
            .await?;

        let keys: Vec<SeriesKey> = members.iter().filter_map(|s| s.parse().ok()).collect();
        self.fetch_descriptors(keys).await
    }

    async fn series_for(&self, name: &str) -> Result<Vec<SeriesDescriptor>, StorageError> {
        let idx = Self::metric_index_key(name);
        let members: Vec<String> = self
            .pool
            .execute(|mut conn| {
                let idx = idx.clone();
                async move { conn.smembers(&idx).await }
            })
            .await?;

        let keys: Vec<SeriesKey> = members.iter().filter_map(|s| s.parse().ok()).collect();
        self.fetch_descriptors(keys).await
    }

    async fn write_bucket(
        &self,
        bucket: &AggregationBucket,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let agg_key = Self::agg_key(bucket.window, bucket.series_key);
        let record =
            serde_json::to_string(bucket).map_err(|e| StorageError::Encoding(e.to_string()))?;
        let start = bucket.bucket_start;
        let ttl_s = ttl.as_secs() as i64;

        self.pool
            .execute(|mut conn| {
                let agg_key = agg_key.clone();
                let record = record.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.zrembyscore(&agg_key, start, start)
                        .ignore()
                        .zadd(&agg_key, &record, start)
                        .ignore()
                        .expire(&agg_key, ttl_s)
                        .ignore();
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await
    }

    async fn read_bucket(
        &self,
        key: SeriesKey,
        window: AggregationWindow,
        bucket_start: i64,
    ) -> Result<Option<AggregationBucket>, StorageError> {
        let agg_key = Self::agg_key(window, key);

        let members: Vec<String> = self
            .pool
            .execute(|mut conn| {
                let agg_key = agg_key.clone();
                async move { conn.zrangebyscore(&agg_key, bucket_start, bucket_start).await }
            })
            .await?;

        match members.first() {
            Some(json) => {
                let bucket = serde_json::from_str(json)
                    .map_err(|e| StorageError::Encoding(e.to_string()))?;
                Ok(Some(bucket))
            },
            None => Ok(None),
        }
    }

    async fn healthy(&self) -> bool {
        self.pool.ping().await
    }
}
