//! Target and metric metadata catalog
//!
//! The catalog owns scrape-target configuration, per-target scrape health
//! and per-metric metadata. It is the only piece of state the background
//! tasks share besides the store, and they only ever read it; mutation
//! happens through target registration and scrape/parse bookkeeping.
//!
//! Disabling a target removes it from the active schedule without deleting
//! any stored history. The schedule itself is re-derived from the catalog
//! on every tick, so a restarted process picks up exactly where the
//! configuration says it should be.

use dashmap::DashMap;

use crate::types::{MetricMetadata, MetricSample, ScrapeTarget, TargetHealth};

/// In-process catalog of scrape targets and metric metadata
///
/// Constructed once per process and handed to each task as `Arc<Catalog>`
/// (dependency injection, no ambient globals). All maps are sharded
/// concurrent maps; readers never block the scrape path.
#[derive(Default)]
pub struct Catalog {
    targets: DashMap<String, ScrapeTarget>,
    health: DashMap<String, TargetHealth>,
    metadata: DashMap<String, MetricMetadata>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog pre-populated with targets
    pub fn with_targets(targets: impl IntoIterator<Item = ScrapeTarget>) -> Self {
        let catalog = Self::new();
        for target in targets {
            catalog.upsert_target(target);
        }
        catalog
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    /// Register a new target or replace an existing one with the same id
    pub fn upsert_target(&self, target: ScrapeTarget) {
        self.health
            .entry(target.id.clone())
            .or_insert_with(|| TargetHealth {
                job: target.job.clone(),
                instance: target.instance.clone(),
                up: false,
                last_scrape: None,
                duration_ms: None,
            });
        self.targets.insert(target.id.clone(), target);
    }

    /// Remove a target and its health entry; stored history stays
    pub fn remove_target(&self, id: &str) -> Option<ScrapeTarget> {
        self.health.remove(id);
        self.targets.remove(id).map(|(_, t)| t)
    }

    /// Look up one target
    pub fn target(&self, id: &str) -> Option<ScrapeTarget> {
        self.targets.get(id).map(|t| t.value().clone())
    }

    /// All registered targets
    pub fn targets(&self) -> Vec<ScrapeTarget> {
        self.targets.iter().map(|t| t.value().clone()).collect()
    }

    /// Targets currently in the active schedule
    pub fn enabled_targets(&self) -> Vec<ScrapeTarget> {
        self.targets
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.value().clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Scrape health
    // ------------------------------------------------------------------

    /// Record the outcome of one scrape attempt
    pub fn record_scrape(&self, target_id: &str, up: bool, duration_ms: u64, now_ms: i64) {
        if let Some(mut health) = self.health.get_mut(target_id) {
            health.up = up;
            health.last_scrape = Some(now_ms);
            health.duration_ms = Some(duration_ms);
        }
    }

    /// Health snapshot for every known target
    pub fn health(&self) -> Vec<TargetHealth> {
        let mut out: Vec<TargetHealth> = self.health.iter().map(|h| h.value().clone()).collect();
        out.sort_by(|a, b| (&a.job, &a.instance).cmp(&(&b.job, &b.instance)));
        out
    }

    /// Health for one target
    pub fn target_health(&self, target_id: &str) -> Option<TargetHealth> {
        self.health.get(target_id).map(|h| h.value().clone())
    }

    // ------------------------------------------------------------------
    // Metric metadata
    // ------------------------------------------------------------------

    /// Upsert metadata from the samples of one successful scrape
    ///
    /// `last_seen` always moves forward to `now_ms`; `first_seen` is set
    /// once. Kind and help follow the most recent exposition comments.
    pub fn upsert_metadata(&self, samples: &[MetricSample], now_ms: i64) {
        for sample in samples {
            let mut entry = self
                .metadata
                .entry(sample.name.clone())
                .or_insert_with(|| MetricMetadata {
                    name: sample.name.clone(),
                    kind: None,
                    help: None,
                    labels_seen: Default::default(),
                    first_seen: now_ms,
                    last_seen: now_ms,
                });

            entry.last_seen = now_ms;
            if sample.kind.is_some() {
                entry.kind = sample.kind;
            }
            if sample.help.is_some() {
                entry.help = sample.help.clone();
            }
            for key in sample.labels.keys() {
                if !entry.labels_seen.contains(key) {
                    entry.labels_seen.insert(key.clone());
                }
            }
        }
    }

    /// Metadata for one metric name
    pub fn metadata(&self, name: &str) -> Option<MetricMetadata> {
        self.metadata.get(name).map(|m| m.value().clone())
    }

    /// All known metric metadata, sorted by name
    pub fn metadata_all(&self) -> Vec<MetricMetadata> {
        let mut out: Vec<MetricMetadata> = self.metadata.iter().map(|m| m.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Labels;

    fn target(id: &str, enabled: bool) -> ScrapeTarget {
        ScrapeTarget {
            id: id.to_string(),
            job: "node".to_string(),
            instance: format!("{}:9100", id),
            path: "/metrics".to_string(),
            scheme: crate::types::Scheme::Http,
            interval_s: 15,
            timeout_s: 10,
            static_labels: Labels::new(),
            enabled,
        }
    }

    fn sample(name: &str, kind: Option<crate::types::MetricKind>) -> MetricSample {
        let mut labels = Labels::new();
        labels.insert("host".to_string(), "a".to_string());
        MetricSample {
            name: name.to_string(),
            labels,
            value: 1.0,
            timestamp_ms: 0,
            kind,
            help: None,
        }
    }

    #[test]
    fn test_disabled_targets_leave_schedule_but_stay_registered() {
        let catalog = Catalog::with_targets([target("a", true), target("b", false)]);

        assert_eq!(catalog.targets().len(), 2);
        let enabled = catalog.enabled_targets();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "a");
    }

    #[test]
    fn test_upsert_replaces_target() {
        let catalog = Catalog::new();
        catalog.upsert_target(target("a", true));

        let mut changed = target("a", true);
        changed.interval_s = 30;
        catalog.upsert_target(changed);

        assert_eq!(catalog.targets().len(), 1);
        assert_eq!(catalog.target("a").unwrap().interval_s, 30);
    }

    #[test]
    fn test_record_scrape_updates_health() {
        let catalog = Catalog::with_targets([target("a", true)]);
        catalog.record_scrape("a", true, 12, 1_000);

        let health = catalog.target_health("a").unwrap();
        assert!(health.up);
        assert_eq!(health.last_scrape, Some(1_000));
        assert_eq!(health.duration_ms, Some(12));

        catalog.record_scrape("a", false, 10_000, 2_000);
        let health = catalog.target_health("a").unwrap();
        assert!(!health.up);
        assert_eq!(health.last_scrape, Some(2_000));
    }

    #[test]
    fn test_new_target_starts_down() {
        let catalog = Catalog::with_targets([target("a", true)]);
        let health = catalog.target_health("a").unwrap();
        assert!(!health.up);
        assert!(health.last_scrape.is_none());
    }

    #[test]
    fn test_metadata_upsert_tracks_seen() {
        use crate::types::MetricKind;

        let catalog = Catalog::new();
        catalog.upsert_metadata(&[sample("up", None)], 100);
        catalog.upsert_metadata(&[sample("up", Some(MetricKind::Gauge))], 200);

        let meta = catalog.metadata("up").unwrap();
        assert_eq!(meta.first_seen, 100);
        assert_eq!(meta.last_seen, 200);
        assert_eq!(meta.kind, Some(MetricKind::Gauge));
        assert!(meta.labels_seen.contains("host"));
    }
}
