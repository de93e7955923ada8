//! Core data types used throughout the metrics hub
//!
//! This module defines the fundamental data structures shared across the
//! system:
//!
//! # Key Types
//!
//! - **`MetricSample`**: one parsed exposition value with its label set
//! - **`SeriesKey`**: deterministic 64-bit identifier for a (name, labels) pair
//! - **`DataPoint`**: a single `(timestamp_ms, value)` measurement
//! - **`AggregationBucket`**: fixed-window summary statistics for one series
//! - **`ScrapeTarget`**: one HTTP(S) endpoint polled for exposition text
//! - **`MetricMetadata`**: per-metric catalog entry (type, help, label keys)
//!
//! # Example
//!
//! ```rust
//! use metrics_hub::types::{AggregationWindow, bucket_start_for};
//!
//! let w = AggregationWindow::OneMinute;
//! assert_eq!(bucket_start_for(61_500, w.window_ms()), 60_000);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Label set for a metric, sorted by key.
///
/// A `BTreeMap` keeps labels in canonical order so that key derivation and
/// serialization never depend on insertion order.
pub type Labels = BTreeMap<String, String>;

/// Exposition metric kinds (`# TYPE` comment values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically increasing value
    Counter,
    /// Arbitrary value that can go up and down
    Gauge,
    /// Bucketed distribution
    Histogram,
    /// Quantile sketch
    Summary,
}

impl FromStr for MetricKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            "histogram" => Ok(MetricKind::Histogram),
            "summary" => Ok(MetricKind::Summary),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        };
        write!(f, "{}", s)
    }
}

/// One parsed metric value, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name (e.g. `node_cpu_usage_percent`)
    pub name: String,

    /// Full label set, target labels already merged in
    pub labels: Labels,

    /// Sample value
    pub value: f64,

    /// Sample timestamp in unix milliseconds
    pub timestamp_ms: i64,

    /// Metric kind from the preceding `# TYPE` comment, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MetricKind>,

    /// Help text from the preceding `# HELP` comment, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

/// A single time-series measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Timestamp in unix milliseconds
    pub timestamp: i64,

    /// Measured value
    pub value: f64,
}

impl DataPoint {
    /// Create a new data point
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Deterministic identifier for one (metric name, label set) combination
///
/// Derived by hashing the canonical encoding of the name and sorted labels
/// (see [`crate::store::key::series_key`]). Two samples with the same name
/// and label set always resolve to the same key, regardless of label order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesKey(pub u64);

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SeriesKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(SeriesKey)
    }
}

/// What a series key resolves back to
///
/// Stored alongside the raw points so query results can carry the original
/// name and label set instead of an opaque hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDescriptor {
    /// Series key
    pub key: SeriesKey,

    /// Metric name
    pub name: String,

    /// Label set
    pub labels: Labels,
}

/// Supported rollup windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationWindow {
    /// 1-minute buckets
    #[serde(rename = "1m")]
    OneMinute,
    /// 5-minute buckets
    #[serde(rename = "5m")]
    FiveMinutes,
    /// 1-hour buckets
    #[serde(rename = "1h")]
    OneHour,
}

impl AggregationWindow {
    /// All windows the aggregation engine computes, smallest first
    pub const ALL: [AggregationWindow; 3] = [
        AggregationWindow::OneMinute,
        AggregationWindow::FiveMinutes,
        AggregationWindow::OneHour,
    ];

    /// Window width in milliseconds
    pub fn window_ms(&self) -> i64 {
        match self {
            AggregationWindow::OneMinute => 60_000,
            AggregationWindow::FiveMinutes => 300_000,
            AggregationWindow::OneHour => 3_600_000,
        }
    }

    /// Short label used in storage keys and config ("1m", "5m", "1h")
    pub fn label(&self) -> &'static str {
        match self {
            AggregationWindow::OneMinute => "1m",
            AggregationWindow::FiveMinutes => "5m",
            AggregationWindow::OneHour => "1h",
        }
    }
}

impl fmt::Display for AggregationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Compute the fixed bucket boundary containing `timestamp_ms`
///
/// Boundaries depend only on the window size, never on when the aggregation
/// job runs, so re-running a rollup always covers the same span.
pub fn bucket_start_for(timestamp_ms: i64, window_ms: i64) -> i64 {
    (timestamp_ms / window_ms) * window_ms
}

/// Fixed-window summary statistics for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationBucket {
    /// Series the bucket belongs to
    pub series_key: SeriesKey,

    /// Rollup window
    pub window: AggregationWindow,

    /// Inclusive bucket start, `floor(ts / window_ms) * window_ms`
    pub bucket_start: i64,

    /// Number of raw samples in the bucket
    pub count: u64,

    /// Sum of raw values
    pub sum: f64,

    /// Minimum raw value
    pub min: f64,

    /// Maximum raw value
    pub max: f64,
}

impl AggregationBucket {
    /// Compute a bucket from raw points, returning `None` for an empty range
    pub fn from_points(
        series_key: SeriesKey,
        window: AggregationWindow,
        bucket_start: i64,
        points: &[DataPoint],
    ) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for p in points {
            sum += p.value;
            min = min.min(p.value);
            max = max.max(p.value);
        }

        Some(Self {
            series_key,
            window,
            bucket_start,
            count: points.len() as u64,
            sum,
            min,
            max,
        })
    }
}

/// URL scheme for a scrape target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP
    Http,
    /// HTTPS
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

/// One HTTP(S) endpoint periodically polled for exposition text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeTarget {
    /// Unique target identifier
    pub id: String,

    /// Job name, merged into every sample as the `job` label
    pub job: String,

    /// Host:port, merged into every sample as the `instance` label
    pub instance: String,

    /// Metrics path on the target
    #[serde(default = "default_metrics_path")]
    pub path: String,

    /// URL scheme
    #[serde(default = "default_scheme")]
    pub scheme: Scheme,

    /// Scrape period in seconds
    #[serde(default = "default_interval_s")]
    pub interval_s: u64,

    /// Hard timeout for one fetch in seconds
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,

    /// Extra labels merged into every sample from this target
    #[serde(default)]
    pub static_labels: Labels,

    /// Disabled targets stay in the catalog but leave the schedule
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_scheme() -> Scheme {
    Scheme::Http
}

fn default_interval_s() -> u64 {
    15
}

fn default_timeout_s() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl ScrapeTarget {
    /// Full URL this target is fetched from
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.instance, self.path)
    }
}

/// Per-metric catalog entry, upserted on every parse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMetadata {
    /// Metric name
    pub name: String,

    /// Kind from the most recent `# TYPE` comment seen
    pub kind: Option<MetricKind>,

    /// Help text from the most recent `# HELP` comment seen
    pub help: Option<String>,

    /// Label keys observed on this metric so far
    pub labels_seen: BTreeSet<String>,

    /// First successful scrape that produced this metric (unix ms)
    pub first_seen: i64,

    /// Most recent successful scrape that produced this metric (unix ms)
    pub last_seen: i64,
}

/// Per-target scrape health, served by the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetHealth {
    /// Job name
    pub job: String,

    /// Instance (host:port)
    pub instance: String,

    /// Whether the last scrape succeeded
    pub up: bool,

    /// Completion time of the last scrape attempt (unix ms), if any
    pub last_scrape: Option<i64>,

    /// Duration of the last scrape attempt in milliseconds
    pub duration_ms: Option<u64>,
}
