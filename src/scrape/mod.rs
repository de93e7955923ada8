//! Scrape scheduler
//!
//! Periodically fetches exposition text from every enabled target, feeds
//! it through the parser and appends the resulting samples to the store.
//!
//! # Scheduling Model
//!
//! One loop ticks every second and re-derives the due set from the catalog,
//! so config changes and process restarts need no schedule state of their
//! own. Due targets are fetched concurrently through a semaphore-bounded
//! worker pool sized independently of target count; total cycle time does
//! not scale linearly with the number of targets or their timeouts.
//!
//! Per target the lifecycle is `Idle → Fetching → {Success, Failed} →
//! Idle`. A target whose previous fetch is still in flight is skipped for
//! the tick rather than queued, so `interval_s < timeout_s` can never pile
//! up overlapping fetches. Failures are isolated: a timeout on one target
//! marks it down and touches nothing else.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use reqwest::header::ACCEPT;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::error::{Error, ScrapeError};
use crate::exposition;
use crate::metrics::HubMetrics;
use crate::service::Service;
use crate::store::Store;
use crate::types::{Labels, ScrapeTarget};

/// Exposition content negotiation header
const ACCEPT_EXPOSITION: &str = "text/plain; version=0.0.4";

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Scheduler tick; the finest granularity target intervals resolve to
    pub tick_interval: Duration,

    /// Worker pool size for concurrent fetches
    pub max_concurrency: usize,

    /// User-Agent header sent to targets
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrency: 8,
            user_agent: format!("metrics-hub/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Per-target scrape lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapePhase {
    /// Never fetched or waiting for its next interval
    Idle,
    /// Fetch in flight
    Fetching,
    /// Last fetch stored samples
    Success,
    /// Last fetch timed out or errored
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct TargetState {
    phase: ScrapePhase,
    last_start: Option<Instant>,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            phase: ScrapePhase::Idle,
            last_start: None,
        }
    }
}

/// Periodic scrape scheduler
pub struct ScrapeScheduler {
    catalog: Arc<Catalog>,
    store: Arc<dyn Store>,
    metrics: Arc<HubMetrics>,
    client: reqwest::Client,
    config: ScrapeConfig,
    states: Arc<DashMap<String, TargetState>>,
    limiter: Arc<Semaphore>,
}

impl ScrapeScheduler {
    /// Create a scheduler over the given catalog and store
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn Store>,
        metrics: Arc<HubMetrics>,
        config: ScrapeConfig,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_default();

        Self {
            catalog,
            store,
            metrics,
            client,
            limiter: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            states: Arc::new(DashMap::new()),
        }
    }

    /// Current lifecycle phase for a target
    pub fn phase(&self, target_id: &str) -> ScrapePhase {
        self.states
            .get(target_id)
            .map(|s| s.phase)
            .unwrap_or(ScrapePhase::Idle)
    }

    /// Whether the target's interval has elapsed and no fetch is in flight
    fn is_due(&self, target: &ScrapeTarget) -> bool {
        let state = self
            .states
            .get(&target.id)
            .map(|s| *s)
            .unwrap_or_default();

        if state.phase == ScrapePhase::Fetching {
            // Overlap policy: skip, never queue
            return false;
        }

        match state.last_start {
            None => true,
            Some(start) => start.elapsed() >= Duration::from_secs(target.interval_s),
        }
    }

    /// One scheduler tick: fire-and-track a fetch for every due target
    fn tick(&self) {
        for target in self.catalog.enabled_targets() {
            if !self.is_due(&target) {
                continue;
            }

            self.states.insert(
                target.id.clone(),
                TargetState {
                    phase: ScrapePhase::Fetching,
                    last_start: Some(Instant::now()),
                },
            );

            let client = self.client.clone();
            let catalog = Arc::clone(&self.catalog);
            let store = Arc::clone(&self.store);
            let metrics = Arc::clone(&self.metrics);
            let states = Arc::clone(&self.states);
            let limiter = Arc::clone(&self.limiter);

            tokio::spawn(async move {
                // The pool bound holds fetches back, not the scheduler loop
                let _permit = limiter.acquire_owned().await;
                let phase = scrape_one(&client, &target, &catalog, &store, &metrics).await;
                if let Some(mut state) = states.get_mut(&target.id) {
                    state.phase = phase;
                }
            });
        }
    }

    /// Scrape every enabled target once and wait for completion
    ///
    /// Used by tests and the `scrape-once` CLI command; the background
    /// service uses the non-blocking tick instead.
    pub async fn scrape_all(&self) -> usize {
        let targets = self.catalog.enabled_targets();
        let count = targets.len();

        stream::iter(targets)
            .for_each_concurrent(self.config.max_concurrency, |target| {
                let client = self.client.clone();
                let catalog = Arc::clone(&self.catalog);
                let store = Arc::clone(&self.store);
                let metrics = Arc::clone(&self.metrics);
                let states = Arc::clone(&self.states);
                async move {
                    states.insert(
                        target.id.clone(),
                        TargetState {
                            phase: ScrapePhase::Fetching,
                            last_start: Some(Instant::now()),
                        },
                    );
                    let phase = scrape_one(&client, &target, &catalog, &store, &metrics).await;
                    if let Some(mut state) = states.get_mut(&target.id) {
                        state.phase = phase;
                    }
                }
            })
            .await;

        count
    }
}

#[async_trait::async_trait]
impl Service for ScrapeScheduler {
    async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), Error> {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                _ = shutdown.recv() => break,
            }
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "scrape-scheduler"
    }
}

/// Labels every sample from this target inherits
///
/// `job` and `instance` override same-named static labels.
fn target_labels(target: &ScrapeTarget) -> Labels {
    let mut labels = target.static_labels.clone();
    labels.insert("job".to_string(), target.job.clone());
    labels.insert("instance".to_string(), target.instance.clone());
    labels
}

/// Fetch one target's exposition body
async fn fetch(client: &reqwest::Client, target: &ScrapeTarget) -> Result<String, ScrapeError> {
    let response = client
        .get(target.url())
        .header(ACCEPT, ACCEPT_EXPOSITION)
        .timeout(Duration::from_secs(target.timeout_s))
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Timeout(target.timeout_s)
            } else {
                ScrapeError::from(e)
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ScrapeError::Status(status.as_u16()));
    }

    response.text().await.map_err(|e| {
        if e.is_timeout() {
            ScrapeError::Timeout(target.timeout_s)
        } else {
            ScrapeError::Http(e.to_string())
        }
    })
}

/// Execute one complete scrape: fetch, parse, append, bookkeeping
///
/// Every failure path is contained here; the returned phase is the only
/// thing that escapes to the scheduler loop.
async fn scrape_one(
    client: &reqwest::Client,
    target: &ScrapeTarget,
    catalog: &Catalog,
    store: &Arc<dyn Store>,
    metrics: &HubMetrics,
) -> ScrapePhase {
    let started = Instant::now();

    match fetch(client, target).await {
        Ok(body) => {
            let now_ms = Utc::now().timestamp_millis();
            let outcome = exposition::parse(&body, &target_labels(target), now_ms);

            if !outcome.errors.is_empty() {
                metrics.add(&metrics.line_errors, outcome.errors.len() as u64);
                for err in &outcome.errors {
                    debug!(target = %target.id, %err, "skipped exposition line");
                }
            }

            let mut appended = 0u64;
            for sample in &outcome.samples {
                match store.append(sample).await {
                    Ok(_) => appended += 1,
                    Err(e) => {
                        metrics.incr(&metrics.storage_errors);
                        warn!(target = %target.id, metric = %sample.name, error = %e,
                              "append abandoned");
                    },
                }
            }

            catalog.upsert_metadata(&outcome.samples, now_ms);
            let duration_ms = started.elapsed().as_millis() as u64;
            catalog.record_scrape(&target.id, true, duration_ms, now_ms);

            metrics.incr(&metrics.scrapes_ok);
            metrics.add(&metrics.samples_appended, appended);
            debug!(
                target = %target.id,
                samples = outcome.samples.len(),
                appended,
                duration_ms,
                "scrape complete"
            );
            ScrapePhase::Success
        },
        Err(e) => {
            let now_ms = Utc::now().timestamp_millis();
            let duration_ms = started.elapsed().as_millis() as u64;
            catalog.record_scrape(&target.id, false, duration_ms, now_ms);
            metrics.incr(&metrics.scrapes_failed);
            warn!(target = %target.id, error = %e, "scrape failed");
            ScrapePhase::Failed
        },
    }
}
