//! Query engine
//!
//! Answers range and instant queries over the store with percentile
//! statistics per series. Resolution: every series whose name matches the
//! selector's metric and whose labels satisfy its matchers is read via
//! [`Store::range`]; queries never mutate state.
//!
//! Invalid syntax returns a [`QueryError`] immediately (the HTTP layer
//! maps it to 400); an empty result set is a successful, empty response.

pub mod selector;
pub mod stats;

pub use selector::{parse_selector, CompiledSelector, LabelMatcher, MatchOp, Selector};
pub use stats::{compute as compute_stats, percentile, SeriesStats};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::QueryError;
use crate::metrics::HubMetrics;
use crate::store::Store;
use crate::types::{DataPoint, Labels, SeriesKey};

/// How far back an instant query looks for the latest sample
const INSTANT_LOOKBACK: Duration = Duration::from_secs(300);

/// A query as received from the API
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// Selector string, e.g. `cpu_usage{host="a"}`
    pub query: String,

    /// Range start (unix ms); presence makes this a range query
    #[serde(default)]
    pub start: Option<i64>,

    /// Range end (unix ms); defaults to now for range queries
    #[serde(default)]
    pub end: Option<i64>,

    /// Optional downsample step (ms) for range queries
    #[serde(default)]
    pub step: Option<i64>,

    /// Instant-query evaluation time (unix ms); defaults to now when no
    /// range is given
    #[serde(default)]
    pub time: Option<i64>,
}

/// One matched series with its points and statistics
#[derive(Debug, Clone, Serialize)]
pub struct SeriesResult {
    /// Series key
    pub key: SeriesKey,

    /// Metric name
    pub name: String,

    /// Label set
    pub labels: Labels,

    /// Points in ascending timestamp order
    pub points: Vec<DataPoint>,

    /// Summary statistics over the returned points
    pub stats: SeriesStats,
}

/// Stateless query engine over the store
pub struct QueryEngine {
    store: Arc<dyn Store>,
    metrics: Arc<HubMetrics>,
}

impl QueryEngine {
    /// Create an engine
    pub fn new(store: Arc<dyn Store>, metrics: Arc<HubMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Execute one query
    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<SeriesResult>, QueryError> {
        let compiled = CompiledSelector::compile(parse_selector(&request.query)?)?;

        let now_ms = Utc::now().timestamp_millis();
        let mode = Mode::from_request(request, now_ms)?;

        let candidates = self.store.series_for(&compiled.metric).await?;
        let mut results = Vec::new();

        for desc in candidates {
            if !compiled.matches(&desc.labels) {
                continue;
            }

            let points = match mode {
                Mode::Range { start, end, step } => {
                    let raw = self.store.range(desc.key, start, end).await?;
                    match step {
                        Some(step) => downsample(raw, start, step),
                        None => raw,
                    }
                },
                Mode::Instant { at } => {
                    let from = at - INSTANT_LOOKBACK.as_millis() as i64;
                    // Upper bound is exclusive; include a sample exactly at `at`
                    let raw = self.store.range(desc.key, from, at + 1).await?;
                    raw.last().copied().into_iter().collect()
                },
            };

            // A series with nothing in the window contributes no result
            let values: Vec<f64> = points.iter().map(|p| p.value).collect();
            let Some(stats) = compute_stats(&values) else {
                continue;
            };

            results.push(SeriesResult {
                key: desc.key,
                name: desc.name,
                labels: desc.labels,
                points,
                stats,
            });
        }

        self.metrics.incr(&self.metrics.queries_served);
        debug!(
            query = %request.query,
            series = results.len(),
            "query served"
        );
        Ok(results)
    }
}

/// Resolved query mode
#[derive(Debug, Clone, Copy)]
enum Mode {
    Range {
        start: i64,
        end: i64,
        step: Option<i64>,
    },
    Instant {
        at: i64,
    },
}

impl Mode {
    /// Classify a request: `start` makes it a range query, otherwise it is
    /// instant at `time` (or now)
    fn from_request(request: &QueryRequest, now_ms: i64) -> Result<Self, QueryError> {
        match request.start {
            Some(start) => {
                let end = request.end.unwrap_or(now_ms);
                if start >= end {
                    return Err(QueryError::InvalidRange { start, end });
                }
                let step = match request.step {
                    Some(step) if step <= 0 => {
                        return Err(QueryError::Parse(format!(
                            "step must be positive, got {}",
                            step
                        )));
                    },
                    other => other,
                };
                Ok(Mode::Range { start, end, step })
            },
            None => Ok(Mode::Instant {
                at: request.time.unwrap_or(now_ms),
            }),
        }
    }
}

/// Keep the last point of each step-aligned bucket
fn downsample(points: Vec<DataPoint>, start: i64, step: i64) -> Vec<DataPoint> {
    let mut out: Vec<DataPoint> = Vec::new();
    let mut current_slot: Option<i64> = None;

    for point in points {
        let slot = (point.timestamp - start) / step;
        if current_slot == Some(slot) {
            // Later point in the same slot wins
            if let Some(last) = out.last_mut() {
                *last = point;
            }
        } else {
            current_slot = Some(slot);
            out.push(point);
        }
    }

    out
}
