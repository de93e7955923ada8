//! Redis connection pool with retry logic
//!
//! Wraps a multiplexed async Redis connection behind a semaphore-bounded
//! pool with:
//! - Configurable connection and command timeouts
//! - Exponential backoff retry with jitter for transient failures
//! - Atomic operation counters for the hub's own `/metrics` output
//!
//! Every store operation goes through [`RedisPool::execute`], which owns
//! the timeout/retry policy, so the store implementation above it stays
//! free of connection management.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

use crate::error::StorageError;

/// Configuration for the Redis connection pool
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Redis server URL (e.g. "redis://localhost:6379")
    pub url: String,

    /// Maximum number of concurrent commands
    pub max_concurrency: u32,

    /// Timeout for establishing the connection
    pub connection_timeout: Duration,

    /// Timeout for individual commands
    pub command_timeout: Duration,

    /// Retry policy for failed operations
    pub retry: RetryPolicy,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_concurrency: 16,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl RedisConfig {
    /// Create a config for the given URL with defaults elsewhere
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Redis URL cannot be empty".to_string());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Retry policy with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Add random jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given 0-indexed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let final_ms = if self.jitter {
            capped * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Operation counters, exported through the hub's `/metrics` endpoint
#[derive(Debug, Default)]
pub struct PoolCounters {
    /// Commands completed successfully
    pub commands_ok: AtomicU64,

    /// Commands that failed after all retries
    pub commands_failed: AtomicU64,

    /// Retry attempts made
    pub retries: AtomicU64,

    /// Cumulative command latency in microseconds
    pub latency_us: AtomicU64,
}

impl PoolCounters {
    fn record_ok(&self, elapsed: Duration) {
        self.commands_ok.fetch_add(1, Ordering::Relaxed);
        self.latency_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }
}

/// Semaphore-bounded pool over one multiplexed Redis connection
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    config: RedisConfig,
    counters: Arc<PoolCounters>,
    semaphore: Arc<Semaphore>,
}

impl RedisPool {
    /// Create a pool and establish the initial connection
    pub async fn connect(config: RedisConfig) -> Result<Self, StorageError> {
        config.validate().map_err(StorageError::Connection)?;

        let client =
            Client::open(config.url.as_str()).map_err(|e| StorageError::Connection(e.to_string()))?;

        let pool = Self {
            client,
            connection: RwLock::new(None),
            semaphore: Arc::new(Semaphore::new(config.max_concurrency as usize)),
            counters: Arc::new(PoolCounters::default()),
            config,
        };

        pool.reconnect().await?;
        debug!("redis pool connected");
        Ok(pool)
    }

    /// (Re-)establish the multiplexed connection
    async fn reconnect(&self) -> Result<(), StorageError> {
        let fut = self.client.get_multiplexed_async_connection();
        let conn = tokio::time::timeout(self.config.connection_timeout, fut)
            .await
            .map_err(|_| StorageError::Timeout(self.config.connection_timeout))?
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        *self.connection.write().await = Some(conn);
        Ok(())
    }

    async fn current_connection(&self) -> Result<MultiplexedConnection, StorageError> {
        if let Some(conn) = self.connection.read().await.clone() {
            return Ok(conn);
        }

        self.reconnect().await?;
        self.connection
            .read()
            .await
            .clone()
            .ok_or_else(|| StorageError::Connection("no connection available".to_string()))
    }

    /// Execute a command with bounded concurrency, timeout and retry
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = Result<T, RedisError>>,
    {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::Connection("pool closed".to_string()))?;

        let mut attempt = 0;
        loop {
            let conn = self.current_connection().await?;
            let start = Instant::now();

            match tokio::time::timeout(self.config.command_timeout, f(conn)).await {
                Ok(Ok(value)) => {
                    self.counters.record_ok(start.elapsed());
                    return Ok(value);
                },
                Ok(Err(e)) => {
                    if self.config.retry.should_retry(attempt) && is_retriable(&e) {
                        self.counters.record_retry();
                        let delay = self.config.retry.delay_for_attempt(attempt);
                        warn!(attempt, ?delay, error = %e, "redis command failed, retrying");
                        tokio::time::sleep(delay).await;
                        if is_connection_error(&e) {
                            let _ = self.reconnect().await;
                        }
                        attempt += 1;
                        continue;
                    }
                    self.counters.record_failure();
                    return Err(StorageError::Connection(e.to_string()));
                },
                Err(_) => {
                    if self.config.retry.should_retry(attempt) {
                        self.counters.record_retry();
                        let delay = self.config.retry.delay_for_attempt(attempt);
                        warn!(attempt, ?delay, "redis command timed out, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    self.counters.record_failure();
                    return Err(StorageError::Timeout(self.config.command_timeout));
                },
            }
        }
    }

    /// PING the server
    pub async fn ping(&self) -> bool {
        self.execute(|mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .is_ok()
    }

    /// Shared operation counters
    pub fn counters(&self) -> Arc<PoolCounters> {
        Arc::clone(&self.counters)
    }

    /// Pool configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

/// Transient failures worth retrying
fn is_retriable(e: &RedisError) -> bool {
    e.is_connection_dropped()
        || e.is_timeout()
        || e.is_io_error()
        || matches!(e.kind(), redis::ErrorKind::BusyLoadingError)
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RedisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrency, 16);
    }

    #[test]
    fn test_config_validation() {
        let config = RedisConfig {
            url: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RedisConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_growth() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: false,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        // Capped
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(2));
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_counters() {
        let counters = PoolCounters::default();
        counters.record_ok(Duration::from_micros(150));
        counters.record_ok(Duration::from_micros(50));
        counters.record_retry();

        assert_eq!(counters.commands_ok.load(Ordering::Relaxed), 2);
        assert_eq!(counters.latency_us.load(Ordering::Relaxed), 200);
        assert_eq!(counters.retries.load(Ordering::Relaxed), 1);
        assert_eq!(counters.commands_failed.load(Ordering::Relaxed), 0);
    }
}
