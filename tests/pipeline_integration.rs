//! End-to-end pipeline tests over the in-memory store
//!
//! Exercises the full parse → append → rollup → query path without any
//! network, pinning the cross-module invariants: deterministic series
//! keys, half-open range semantics, idempotent aggregation and retention
//! pruning.

use std::sync::Arc;
use std::time::Duration;

use metrics_hub::aggregate::AggregationEngine;
use metrics_hub::config::RetentionConfig;
use metrics_hub::exposition;
use metrics_hub::metrics::HubMetrics;
use metrics_hub::query::{QueryEngine, QueryRequest};
use metrics_hub::retention::RetentionJob;
use metrics_hub::store::{series_key, MemoryStore, Store};
use metrics_hub::types::{AggregationWindow, Labels, MetricSample};

fn target_labels() -> Labels {
    let mut labels = Labels::new();
    labels.insert("job".to_string(), "node".to_string());
    labels.insert("instance".to_string(), "web-01:9100".to_string());
    labels
}

/// Exposition body with samples spread across the minute at 60s
fn body() -> String {
    let mut out = String::new();
    out.push_str("# TYPE request_latency_ms gauge\n");
    for (ts, v) in [(60_100, 12.0), (60_400, 48.0), (60_900, 30.0)] {
        out.push_str(&format!("request_latency_ms{{path=\"/api\"}} {} {}\n", v, ts));
    }
    out
}

async fn populated_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let outcome = exposition::parse(&body(), &target_labels(), 0);
    assert!(outcome.errors.is_empty());

    for sample in &outcome.samples {
        store.append(sample).await.expect("append");
    }
    store
}

#[tokio::test]
async fn test_parse_append_query_roundtrip() {
    let store = populated_store().await;
    let engine = QueryEngine::new(store, Arc::new(HubMetrics::default()));

    let results = engine
        .query(&QueryRequest {
            query: r#"request_latency_ms{instance="web-01:9100"}"#.to_string(),
            start: Some(60_000),
            end: Some(120_000),
            step: None,
            time: None,
        })
        .await
        .expect("query");

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.points.len(), 3);
    assert_eq!(r.stats.min, 12.0);
    assert_eq!(r.stats.max, 48.0);
    assert_eq!(r.stats.avg, 30.0);
    assert_eq!(r.stats.p50, 30.0);
    // Target labels rode through the whole pipeline
    assert_eq!(r.labels.get("job").map(String::as_str), Some("node"));
    assert_eq!(r.labels.get("path").map(String::as_str), Some("/api"));
}

#[tokio::test]
async fn test_series_key_stable_across_pipeline() {
    let store = populated_store().await;

    let mut expected_labels = target_labels();
    expected_labels.insert("path".to_string(), "/api".to_string());
    let expected = series_key("request_latency_ms", &expected_labels);

    let descriptors = store.series().await.expect("series");
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].key, expected);
}

#[tokio::test]
async fn test_rollup_then_reaggregation_is_identical() {
    let store = populated_store().await;
    let retention = RetentionConfig::default();
    let key = store.series().await.expect("series")[0].key;

    let engine = AggregationEngine::new(
        store.clone(),
        Arc::new(HubMetrics::default()),
        retention.clone(),
    );
    // The minute [60_000, 120_000) has closed by 125_000
    engine.run_once(125_000).await;

    let first = store
        .read_bucket(key, AggregationWindow::OneMinute, 60_000)
        .await
        .expect("read")
        .expect("bucket exists");
    assert_eq!(first.count, 3);
    assert_eq!(first.sum, 90.0);
    assert_eq!(first.min, 12.0);
    assert_eq!(first.max, 48.0);

    // A second engine (fresh memo, as after a crash-restart) recomputes
    // the same closed bucket from the same raw data
    let engine2 = AggregationEngine::new(
        store.clone(),
        Arc::new(HubMetrics::default()),
        retention,
    );
    engine2.run_once(125_000).await;

    let second = store
        .read_bucket(key, AggregationWindow::OneMinute, 60_000)
        .await
        .expect("read")
        .expect("bucket exists");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_tie_append_is_last_write_wins_through_query() {
    let store = Arc::new(MemoryStore::new());
    let labels = target_labels();

    for value in [1.0, 99.0] {
        store
            .append(&MetricSample {
                name: "flapping".to_string(),
                labels: labels.clone(),
                value,
                timestamp_ms: 5_000,
                kind: None,
                help: None,
            })
            .await
            .expect("append");
    }

    let engine = QueryEngine::new(store, Arc::new(HubMetrics::default()));
    let results = engine
        .query(&QueryRequest {
            query: "flapping".to_string(),
            start: Some(0),
            end: Some(10_000),
            step: None,
            time: None,
        })
        .await
        .expect("query");

    assert_eq!(results[0].points.len(), 1);
    assert_eq!(results[0].points[0].value, 99.0);
}

#[tokio::test]
async fn test_retention_pass_removes_expired_history() {
    const DAY_MS: i64 = 86_400_000;
    let now = 30 * DAY_MS;

    let store = Arc::new(MemoryStore::new());
    let labels = target_labels();
    for (ts, v) in [
        (now - 10 * DAY_MS, 1.0),
        (now - 8 * DAY_MS, 2.0),
        (now - 2 * DAY_MS, 3.0),
        (now - DAY_MS, 4.0),
    ] {
        store
            .append(&MetricSample {
                name: "cpu".to_string(),
                labels: labels.clone(),
                value: v,
                timestamp_ms: ts,
                kind: None,
                help: None,
            })
            .await
            .expect("append");
    }

    let metrics = Arc::new(HubMetrics::default());
    let job = RetentionJob::new(
        store.clone(),
        Arc::clone(&metrics),
        Duration::from_secs(7 * 86_400),
    );
    job.run_once(now).await;

    let key = store.series().await.expect("series")[0].key;
    let points = store.range(key, 0, now + 1).await.expect("range");
    assert_eq!(points.len(), 2);
    assert!(points.iter().all(|p| p.timestamp >= now - 7 * DAY_MS));
    assert_eq!(metrics.snapshot().points_pruned, 2);
}
