//! Metrics Hub HTTP Server
//!
//! Runs the three background services (scrape scheduler, aggregation
//! engine, retention job) and exposes the hub's HTTP API.
//!
//! # Endpoints
//!
//! ## Query
//! - `POST /api/v1/query` - Range/instant query with percentile stats
//!
//! ## Targets
//! - `GET /api/v1/targets` - List scrape targets
//! - `POST /api/v1/targets` - Register or update a target
//! - `DELETE /api/v1/targets/:id` - Remove a target
//!
//! ## Admin
//! - `GET /health` - Health check (process + store)
//! - `GET /api/v1/status` - Per-target scrape health
//! - `GET /api/v1/metadata` - Metric metadata catalog
//! - `GET /metrics` - Hub self-metrics (exposition text)
//!
//! # CLI Commands
//!
//! - `start` - Run the server (default when no command is given)
//! - `check-config` - Validate the configuration file and exit
//! - `scrape-once` - Run one scrape cycle against all targets and exit
//!
//! # Configuration
//!
//! Read from `--config <path>`, else the `HUB_CONFIG` environment
//! variable, else `./hub.toml`, else built-in defaults.

mod handlers;
mod types;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use handlers::AppState;
use metrics_hub::aggregate::AggregationEngine;
use metrics_hub::catalog::Catalog;
use metrics_hub::config::ApplicationConfig;
use metrics_hub::error::Error;
use metrics_hub::metrics::HubMetrics;
use metrics_hub::query::QueryEngine;
use metrics_hub::retention::RetentionJob;
use metrics_hub::scrape::{ScrapeConfig, ScrapeScheduler};
use metrics_hub::service::ServiceRunner;
use metrics_hub::store::{RedisStore, Store};

#[derive(Parser)]
#[command(name = "hub-server", about = "Metrics hub server", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server and background services
    Start,
    /// Validate the configuration file and exit
    CheckConfig,
    /// Run one scrape cycle against every enabled target and exit
    ScrapeOnce,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Build CORS layer from configuration
fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any)
    }
}

/// Build the application router
fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        // Health and self-metrics
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Query API
        .route("/api/v1/query", post(handlers::query))
        // Target management
        .route(
            "/api/v1/targets",
            get(handlers::list_targets).post(handlers::upsert_target),
        )
        .route("/api/v1/targets/:id", axum::routing::delete(handlers::delete_target))
        // Status and metadata
        .route("/api/v1/status", get(handlers::status))
        .route("/api/v1/metadata", get(handlers::list_metadata))
        .with_state(state)
        .layer(build_cors_layer(cors_origins))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {},
            Err(e) => {
                warn!(error = %e, "Ctrl+C handler installation failed");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "SIGTERM handler installation failed");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

/// Wire up catalog, store and services from configuration
async fn build_state(
    config: &ApplicationConfig,
) -> Result<(Arc<AppState>, Arc<Catalog>, Arc<dyn Store>, Arc<HubMetrics>), Error> {
    let store = RedisStore::connect(config.redis.pool_config(), config.retention.raw_ttl())
        .await
        .map_err(Error::Storage)?;
    let pool_counters = store.pool().counters();
    let store: Arc<dyn Store> = Arc::new(store);

    let catalog = Arc::new(Catalog::with_targets(config.scrape.targets.iter().cloned()));
    let metrics = Arc::new(HubMetrics::default());

    let state = Arc::new(AppState {
        catalog: Arc::clone(&catalog),
        store: Arc::clone(&store),
        query: QueryEngine::new(Arc::clone(&store), Arc::clone(&metrics)),
        metrics: Arc::clone(&metrics),
        pool_counters: Some(pool_counters),
    });

    Ok((state, catalog, store, metrics))
}

async fn run_server(config: ApplicationConfig) -> Result<(), Error> {
    let (state, catalog, store, metrics) = build_state(&config).await?;

    info!(
        targets = catalog.targets().len(),
        redis = %config.redis.url,
        "metrics hub starting"
    );

    // Background services
    let scheduler = Arc::new(ScrapeScheduler::new(
        Arc::clone(&catalog),
        Arc::clone(&store),
        Arc::clone(&metrics),
        ScrapeConfig {
            max_concurrency: config.scrape.max_concurrency,
            ..Default::default()
        },
    ));
    let aggregation = Arc::new(AggregationEngine::new(
        Arc::clone(&store),
        Arc::clone(&metrics),
        config.retention.clone(),
    ));
    let retention = Arc::new(RetentionJob::new(
        Arc::clone(&store),
        Arc::clone(&metrics),
        config.retention.raw_ttl(),
    ));

    let mut runner = ServiceRunner::new();
    runner.spawn(scheduler);
    runner.spawn(aggregation);
    runner.spawn(retention);

    // HTTP server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| Error::Configuration(format!("invalid listen address: {}", e)))?;
    let router = build_router(state, &config.server.cors_allowed_origins);

    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runner.shutdown().await;
    info!("metrics hub stopped");
    Ok(())
}

async fn run_scrape_once(config: ApplicationConfig) -> Result<(), Error> {
    let (_state, catalog, store, metrics) = build_state(&config).await?;

    let scheduler = ScrapeScheduler::new(
        Arc::clone(&catalog),
        store,
        Arc::clone(&metrics),
        ScrapeConfig {
            max_concurrency: config.scrape.max_concurrency,
            ..Default::default()
        },
    );

    let scraped = scheduler.scrape_all().await;
    let snap = metrics.snapshot();
    println!(
        "scraped {} targets: {} ok, {} failed, {} samples appended",
        scraped, snap.scrapes_ok, snap.scrapes_failed, snap.samples_appended
    );
    Ok(())
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = ApplicationConfig::load(cli.config.as_deref())?;
    init_tracing(&config.monitoring.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()?;

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => runtime.block_on(run_server(config)),
        Command::CheckConfig => {
            println!(
                "configuration ok: {} target(s), redis {}, retention raw {}d/1m {}d/5m {}d/1h {}d",
                config.scrape.targets.len(),
                config.redis.url,
                config.retention.raw_days,
                config.retention.agg_1m_days,
                config.retention.agg_5m_days,
                config.retention.agg_1h_days,
            );
            Ok(())
        },
        Command::ScrapeOnce => runtime.block_on(run_scrape_once(config)),
    }
}
