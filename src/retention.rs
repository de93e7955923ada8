//! Retention job
//!
//! Hourly pass that prunes raw points older than the raw-retention window
//! from every known series. Rollup buckets are not scanned here; they
//! expire on their own per-window TTLs. A prune failure on one series is
//! logged and counted, and the pass continues with the next series.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::Error;
use crate::metrics::HubMetrics;
use crate::service::Service;
use crate::store::Store;

/// Background retention service
pub struct RetentionJob {
    store: Arc<dyn Store>,
    metrics: Arc<HubMetrics>,
    raw_ttl: Duration,
    tick_interval: Duration,
}

impl RetentionJob {
    /// Create a job with the standard hourly cadence
    pub fn new(store: Arc<dyn Store>, metrics: Arc<HubMetrics>, raw_ttl: Duration) -> Self {
        Self {
            store,
            metrics,
            raw_ttl,
            tick_interval: Duration::from_secs(3_600),
        }
    }

    /// Override the cadence (tests)
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Prune every known series as of `now_ms`
    pub async fn run_once(&self, now_ms: i64) {
        let cutoff = now_ms - self.raw_ttl.as_millis() as i64;

        let series = match self.store.series().await {
            Ok(series) => series,
            Err(e) => {
                self.metrics.incr(&self.metrics.storage_errors);
                warn!(error = %e, "series listing failed, retention pass skipped");
                return;
            },
        };

        let mut removed_total = 0u64;
        for desc in series {
            match self.store.prune(desc.key, cutoff).await {
                Ok(removed) => removed_total += removed,
                Err(e) => {
                    self.metrics.incr(&self.metrics.storage_errors);
                    warn!(series = %desc.key, error = %e, "prune failed, continuing");
                },
            }
        }

        if removed_total > 0 {
            self.metrics.add(&self.metrics.points_pruned, removed_total);
        }
        info!(cutoff, removed = removed_total, "retention pass complete");
    }
}

#[async_trait::async_trait]
impl Service for RetentionJob {
    async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), Error> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once(Utc::now().timestamp_millis()).await;
                },
                _ = shutdown.recv() => break,
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "retention-job"
    }
}
