//! Summary statistics over query results
//!
//! Percentiles use the nearest-rank method: with the values sorted
//! ascending, `pN` is the element at index `ceil(len * N) - 1`, clamped to
//! `[0, len - 1]`. NaN values sort as equal and are effectively ignored by
//! the comparisons.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Aggregate statistics for one series' points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    /// Arithmetic mean
    pub avg: f64,
    /// Minimum value
    pub min: f64,
    /// Maximum value
    pub max: f64,
    /// Median (nearest rank)
    pub p50: f64,
    /// 95th percentile (nearest rank)
    pub p95: f64,
    /// 99th percentile (nearest rank)
    pub p99: f64,
}

/// Nearest-rank percentile over an ascending-sorted slice
///
/// Returns `None` for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let rank = (sorted.len() as f64 * p).ceil() as isize - 1;
    let idx = rank.clamp(0, sorted.len() as isize - 1) as usize;
    Some(sorted[idx])
}

/// Compute the full stats block for a set of values
///
/// Returns `None` when there are no values; an empty series carries no
/// statistics rather than zeros.
pub fn compute(values: &[f64]) -> Option<SeriesStats> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let sum: f64 = sorted.iter().sum();
    let len = sorted.len() as f64;

    Some(SeriesStats {
        avg: sum / len,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p50: percentile(&sorted, 0.50)?,
        p95: percentile(&sorted, 0.95)?,
        p99: percentile(&sorted, 0.99)?,
    })
}
