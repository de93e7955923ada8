//! Background service framework
//!
//! The hub runs three independent periodic tasks: the scrape scheduler,
//! the aggregation engine and the retention job. Each implements
//! [`Service`] and owns its own cadence; the [`ServiceRunner`] spawns them
//! on the runtime and fans a broadcast shutdown signal out to all of them.
//!
//! Tasks share no mutable state with each other beyond their `Arc` handles
//! to the store and catalog, so a slow tick in one never delays another.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::Error;

/// Trait for long-running background tasks
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Run the service's main loop until the shutdown signal fires
    async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<(), Error>;

    /// Service name for logging
    fn name(&self) -> &'static str;
}

/// Spawns services and coordinates their shutdown
pub struct ServiceRunner {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(&'static str, JoinHandle<Result<(), Error>>)>,
}

impl ServiceRunner {
    /// Create a runner with no services yet
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Spawn a service onto the runtime
    pub fn spawn(&mut self, service: Arc<dyn Service>) {
        let name = service.name();
        let shutdown = self.shutdown_tx.subscribe();
        info!(service = name, "starting background service");

        let handle = tokio::spawn(async move { service.run(shutdown).await });
        self.handles.push((name, handle));
    }

    /// Signal every service to stop and wait for them to finish
    pub async fn shutdown(self) {
        // Receivers may already be gone if a service exited on its own
        let _ = self.shutdown_tx.send(());

        for (name, handle) in self.handles {
            match handle.await {
                Ok(Ok(())) => info!(service = name, "service stopped"),
                Ok(Err(e)) => error!(service = name, error = %e, "service exited with error"),
                Err(e) => error!(service = name, error = %e, "service task panicked"),
            }
        }
    }
}

impl Default for ServiceRunner {
    fn default() -> Self {
        Self::new()
    }
}
