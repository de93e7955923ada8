//! Scrape scheduler integration tests
//!
//! Runs the scheduler against real HTTP listeners on ephemeral ports and
//! the in-memory store, verifying failure isolation: one target timing
//! out or erroring must not affect any other target's cycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use metrics_hub::catalog::Catalog;
use metrics_hub::metrics::HubMetrics;
use metrics_hub::query::{QueryEngine, QueryRequest};
use metrics_hub::scrape::{ScrapeConfig, ScrapePhase, ScrapeScheduler};
use metrics_hub::store::MemoryStore;
use metrics_hub::types::{Labels, ScrapeTarget, Scheme};

const GOOD_BODY: &str = "\
# HELP node_cpu_usage_percent CPU usage\n\
# TYPE node_cpu_usage_percent gauge\n\
node_cpu_usage_percent{core=\"0\"} 42.5\n\
node_cpu_usage_percent{core=\"1\"} 17.0\n\
node_load1 1.25\n";

/// Serve a router on an ephemeral port, returning its address
async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

async fn healthy_endpoint() -> SocketAddr {
    serve(Router::new().route("/metrics", get(|| async { GOOD_BODY }))).await
}

async fn hanging_endpoint() -> SocketAddr {
    serve(Router::new().route(
        "/metrics",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            GOOD_BODY
        }),
    ))
    .await
}

async fn erroring_endpoint() -> SocketAddr {
    serve(Router::new().route(
        "/metrics",
        get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    ))
    .await
}

fn target(id: &str, addr: SocketAddr, timeout_s: u64) -> ScrapeTarget {
    ScrapeTarget {
        id: id.to_string(),
        job: "node".to_string(),
        instance: addr.to_string(),
        path: "/metrics".to_string(),
        scheme: Scheme::Http,
        interval_s: 15,
        timeout_s,
        static_labels: Labels::new(),
        enabled: true,
    }
}

struct Harness {
    catalog: Arc<Catalog>,
    store: Arc<MemoryStore>,
    metrics: Arc<HubMetrics>,
    scheduler: ScrapeScheduler,
}

fn harness(targets: Vec<ScrapeTarget>) -> Harness {
    let catalog = Arc::new(Catalog::with_targets(targets));
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(HubMetrics::default());
    let scheduler = ScrapeScheduler::new(
        Arc::clone(&catalog),
        store.clone(),
        Arc::clone(&metrics),
        ScrapeConfig::default(),
    );
    Harness {
        catalog,
        store,
        metrics,
        scheduler,
    }
}

#[tokio::test]
async fn test_failed_target_does_not_affect_healthy_one() {
    let good = healthy_endpoint().await;
    let bad = hanging_endpoint().await;

    let h = harness(vec![
        target("a", bad, 1), // times out after 1s
        target("b", good, 5),
    ]);

    let scraped = h.scheduler.scrape_all().await;
    assert_eq!(scraped, 2);

    // B's samples are stored and queryable
    let engine = QueryEngine::new(h.store.clone(), Arc::clone(&h.metrics));
    let results = engine
        .query(&QueryRequest {
            query: "node_cpu_usage_percent".to_string(),
            start: Some(0),
            end: Some(i64::MAX),
            step: None,
            time: None,
        })
        .await
        .expect("query succeeds");
    assert_eq!(results.len(), 2);
    for series in &results {
        assert_eq!(series.labels.get("job").map(String::as_str), Some("node"));
        assert_eq!(
            series.labels.get("instance").map(String::as_str),
            Some(good.to_string().as_str())
        );
    }

    // A is marked down, B up; nothing propagated to the scheduler
    let health_a = h.catalog.target_health("a").expect("health for a");
    let health_b = h.catalog.target_health("b").expect("health for b");
    assert!(!health_a.up);
    assert!(health_a.last_scrape.is_some());
    assert!(health_b.up);

    assert_eq!(h.scheduler.phase("a"), ScrapePhase::Failed);
    assert_eq!(h.scheduler.phase("b"), ScrapePhase::Success);

    let snap = h.metrics.snapshot();
    assert_eq!(snap.scrapes_ok, 1);
    assert_eq!(snap.scrapes_failed, 1);
    assert_eq!(snap.samples_appended, 3);
}

#[tokio::test]
async fn test_non_2xx_marks_target_down() {
    let bad = erroring_endpoint().await;
    let h = harness(vec![target("a", bad, 5)]);

    h.scheduler.scrape_all().await;

    let health = h.catalog.target_health("a").expect("health");
    assert!(!health.up);
    assert!(health.duration_ms.is_some());
    assert_eq!(h.metrics.snapshot().scrapes_failed, 1);
    assert_eq!(h.store.point_count(), 0);
}

#[tokio::test]
async fn test_successful_scrape_updates_metadata() {
    let good = healthy_endpoint().await;
    let h = harness(vec![target("a", good, 5)]);

    h.scheduler.scrape_all().await;

    let meta = h
        .catalog
        .metadata("node_cpu_usage_percent")
        .expect("metadata upserted");
    assert_eq!(meta.kind, Some(metrics_hub::types::MetricKind::Gauge));
    assert!(meta.labels_seen.contains("core"));
    assert!(meta.labels_seen.contains("instance"));
    assert!(meta.last_seen > 0);
}

#[tokio::test]
async fn test_disabled_target_is_not_scraped() {
    let good = healthy_endpoint().await;
    let mut t = target("a", good, 5);
    t.enabled = false;

    let h = harness(vec![t]);
    let scraped = h.scheduler.scrape_all().await;

    assert_eq!(scraped, 0);
    assert_eq!(h.store.point_count(), 0);
    // Still registered, still down, never scraped
    let health = h.catalog.target_health("a").expect("health entry exists");
    assert!(!health.up);
    assert!(health.last_scrape.is_none());
}

#[tokio::test]
async fn test_malformed_lines_do_not_block_valid_ones() {
    let addr = serve(Router::new().route(
        "/metrics",
        get(|| async { "good_metric 1\n%%% broken line %%%\nother_metric 2\n" }),
    ))
    .await;

    let h = harness(vec![target("a", addr, 5)]);
    h.scheduler.scrape_all().await;

    let snap = h.metrics.snapshot();
    assert_eq!(snap.samples_appended, 2);
    assert_eq!(snap.line_errors, 1);
    assert!(h.catalog.target_health("a").expect("health").up);
}
