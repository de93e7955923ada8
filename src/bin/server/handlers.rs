//! HTTP handlers for the hub server
//!
//! All endpoints hang off a shared [`AppState`]. Query errors map to 400
//! with a descriptive message; a store failure inside a query maps to 500.
//! The status endpoint never fails: a down target shows `up=false` with a
//! stale `last_scrape` rather than erroring.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use metrics_hub::catalog::Catalog;
use metrics_hub::error::QueryError;
use metrics_hub::metrics::HubMetrics;
use metrics_hub::query::{QueryEngine, QueryRequest};
use metrics_hub::store::{PoolCounters, Store};
use metrics_hub::types::ScrapeTarget;

use super::types::*;

/// Shared application state
pub struct AppState {
    /// Target and metadata catalog
    pub catalog: Arc<Catalog>,
    /// Time-series store
    pub store: Arc<dyn Store>,
    /// Query engine
    pub query: QueryEngine,
    /// Hub counters
    pub metrics: Arc<HubMetrics>,
    /// Redis pool counters, when the Redis backend is in use
    pub pool_counters: Option<Arc<PoolCounters>>,
}

// =============================================================================
// Health & Status
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        store_healthy: state.store.healthy().await,
    })
}

/// Per-target scrape health for external dashboards
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.catalog.health())
}

/// Hub self-metrics in exposition text format
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = state.metrics.snapshot();

    let mut body = format!(
        "# HELP hub_samples_appended_total Samples appended to the store\n\
         # TYPE hub_samples_appended_total counter\n\
         hub_samples_appended_total {}\n\
         # HELP hub_line_errors_total Malformed exposition lines skipped\n\
         # TYPE hub_line_errors_total counter\n\
         hub_line_errors_total {}\n\
         # HELP hub_scrapes_total Scrape attempts by outcome\n\
         # TYPE hub_scrapes_total counter\n\
         hub_scrapes_total{{outcome=\"success\"}} {}\n\
         hub_scrapes_total{{outcome=\"failure\"}} {}\n\
         # HELP hub_storage_errors_total Store operations abandoned on error\n\
         # TYPE hub_storage_errors_total counter\n\
         hub_storage_errors_total {}\n\
         # HELP hub_buckets_written_total Rollup buckets written\n\
         # TYPE hub_buckets_written_total counter\n\
         hub_buckets_written_total {}\n\
         # HELP hub_points_pruned_total Raw points removed by retention\n\
         # TYPE hub_points_pruned_total counter\n\
         hub_points_pruned_total {}\n\
         # HELP hub_queries_served_total Queries served\n\
         # TYPE hub_queries_served_total counter\n\
         hub_queries_served_total {}\n",
        snap.samples_appended,
        snap.line_errors,
        snap.scrapes_ok,
        snap.scrapes_failed,
        snap.storage_errors,
        snap.buckets_written,
        snap.points_pruned,
        snap.queries_served,
    );

    if let Some(counters) = &state.pool_counters {
        use std::sync::atomic::Ordering;
        body.push_str(&format!(
            "# HELP hub_store_commands_total Redis commands by outcome\n\
             # TYPE hub_store_commands_total counter\n\
             hub_store_commands_total{{outcome=\"ok\"}} {}\n\
             hub_store_commands_total{{outcome=\"failed\"}} {}\n\
             # HELP hub_store_retries_total Redis command retries\n\
             # TYPE hub_store_retries_total counter\n\
             hub_store_retries_total {}\n",
            counters.commands_ok.load(Ordering::Relaxed),
            counters.commands_failed.load(Ordering::Relaxed),
            counters.retries.load(Ordering::Relaxed),
        ));
    }

    (StatusCode::OK, [("content-type", "text/plain")], body)
}

// =============================================================================
// Query
// =============================================================================

/// Execute a range or instant query
pub async fn query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Response {
    match state.query.query(&request).await {
        Ok(results) => (StatusCode::OK, Json(results)).into_response(),
        Err(e @ QueryError::Storage(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

// =============================================================================
// Targets
// =============================================================================

/// List registered targets
pub async fn list_targets(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.catalog.targets())
}

/// Register or update a scrape target
pub async fn upsert_target(
    State(state): State<Arc<AppState>>,
    Json(target): Json<ScrapeTarget>,
) -> Response {
    if target.id.is_empty() || target.job.is_empty() || target.instance.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "target id, job and instance are required".to_string(),
            }),
        )
            .into_response();
    }

    let id = target.id.clone();
    info!(target = %id, instance = %target.instance, "target registered");
    state.catalog.upsert_target(target);

    (StatusCode::OK, Json(TargetUpsertResponse { id })).into_response()
}

/// Remove a target; its stored history stays until retention expires it
pub async fn delete_target(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.catalog.remove_target(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no target with id {:?}", id),
            }),
        )
            .into_response(),
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Metric metadata catalog
pub async fn list_metadata(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.catalog.metadata_all())
}
