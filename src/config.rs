//! Configuration management for the metrics hub
//!
//! TOML configuration with serde defaults for every field, so a missing
//! file or a partial one still yields a runnable process. Lookup order:
//! the `HUB_CONFIG` environment variable, then `./hub.toml`, then built-in
//! defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{AggregationWindow, ScrapeTarget};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApplicationConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Redis backend settings
    #[serde(default)]
    pub redis: RedisSettings,

    /// Scrape scheduler settings and static targets
    #[serde(default)]
    pub scrape: ScrapeSettings,

    /// Per-resolution retention
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Logging and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty means any
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    /// Worker threads for the runtime
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Redis backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisSettings {
    /// Server URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Maximum concurrent commands
    #[serde(default = "default_redis_concurrency")]
    pub max_concurrency: u32,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl RedisSettings {
    /// Convert into the pool's config type
    pub fn pool_config(&self) -> crate::store::RedisConfig {
        crate::store::RedisConfig {
            url: self.url.clone(),
            max_concurrency: self.max_concurrency,
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            retry: Default::default(),
        }
    }
}

/// Scrape scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScrapeSettings {
    /// Worker pool size for concurrent fetches
    #[serde(default = "default_scrape_concurrency")]
    pub max_concurrency: usize,

    /// Targets registered at startup
    #[serde(default)]
    pub targets: Vec<ScrapeTarget>,
}

/// Per-resolution retention, in days
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Raw samples
    #[serde(default = "default_raw_days")]
    pub raw_days: u32,

    /// 1-minute rollups
    #[serde(default = "default_1m_days")]
    pub agg_1m_days: u32,

    /// 5-minute rollups
    #[serde(default = "default_5m_days")]
    pub agg_5m_days: u32,

    /// 1-hour rollups
    #[serde(default = "default_1h_days")]
    pub agg_1h_days: u32,
}

impl RetentionConfig {
    /// Raw-sample retention as a duration
    pub fn raw_ttl(&self) -> Duration {
        days(self.raw_days)
    }

    /// Retention for one rollup window
    pub fn ttl_for(&self, window: AggregationWindow) -> Duration {
        match window {
            AggregationWindow::OneMinute => days(self.agg_1m_days),
            AggregationWindow::FiveMinutes => days(self.agg_5m_days),
            AggregationWindow::OneHour => days(self.agg_1h_days),
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn days(n: u32) -> Duration {
    Duration::from_secs(n as u64 * 24 * 3_600)
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8428
}
fn default_workers() -> usize {
    num_cpus::get()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_redis_concurrency() -> u32 {
    16
}
fn default_connection_timeout_ms() -> u64 {
    5_000
}
fn default_command_timeout_ms() -> u64 {
    1_000
}
fn default_scrape_concurrency() -> usize {
    8
}
fn default_raw_days() -> u32 {
    7
}
fn default_1m_days() -> u32 {
    30
}
fn default_5m_days() -> u32 {
    90
}
fn default_1h_days() -> u32 {
    365
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: Vec::new(),
            workers: default_workers(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            max_concurrency: default_redis_concurrency(),
            connection_timeout_ms: default_connection_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_scrape_concurrency(),
            targets: Vec::new(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_days: default_raw_days(),
            agg_1m_days: default_1m_days(),
            agg_5m_days: default_5m_days(),
            agg_1h_days: default_1h_days(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl ApplicationConfig {
    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            Error::Configuration(format!("{}: {}", path.display(), e))
        })
    }

    /// Resolve configuration from the environment
    ///
    /// `HUB_CONFIG` wins, then `./hub.toml`, then defaults. A path that is
    /// set but unreadable is an error rather than a silent fallback.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(env_path) = std::env::var("HUB_CONFIG") {
            return Self::from_file(&PathBuf::from(env_path));
        }

        let local = Path::new("hub.toml");
        if local.exists() {
            return Self::from_file(local);
        }

        Ok(Self::default())
    }
}
