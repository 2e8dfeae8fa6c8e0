//! Runtime lifecycle: background task ownership and graceful shutdown.

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::service::{FetchPool, ResourceService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::builder::SpyglassRuntimeBuilder;

/// The assembled gateway runtime.
///
/// Owns the service plus the lifecycle-bearing pieces (cache sweep,
/// heartbeat task, fetch pool) and coordinates their shutdown through a
/// broadcast channel. `shutdown()` is idempotent.
pub struct SpyglassRuntime {
    service: ResourceService,
    cache: Arc<ResponseCache>,
    pool: Arc<FetchPool>,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    heartbeat_task: Option<JoinHandle<()>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl SpyglassRuntime {
    /// Entry point; see [`SpyglassRuntimeBuilder`].
    #[must_use]
    pub fn builder() -> SpyglassRuntimeBuilder {
        SpyglassRuntimeBuilder::new()
    }

    pub(super) fn new(
        service: ResourceService,
        cache: Arc<ResponseCache>,
        pool: Arc<FetchPool>,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        heartbeat_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            service,
            cache,
            pool,
            shutdown_tx,
            config,
            heartbeat_task,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn service(&self) -> &ResourceService {
        &self.service
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// A fresh shutdown receiver, for custom background tasks that want
    /// to stop with the runtime.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Gracefully shuts the runtime down.
    ///
    /// Signals every task, stops the cache sweep, cancels pending origin
    /// fetches and waits for the heartbeat task to exit. Safe to call
    /// more than once.
    pub async fn shutdown(self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("initiating runtime shutdown");
        if let Err(e) = self.shutdown_tx.send(()) {
            debug!(error = %e, "no shutdown listeners");
        }

        self.cache.stop_cleanup();
        debug!("cache sweep stopped");

        self.pool.cancel_all();
        debug!("pending origin fetches cancelled");

        if let Some(heartbeat_task) = self.heartbeat_task {
            match heartbeat_task.await {
                Ok(()) => debug!("heartbeat task completed"),
                Err(e) if e.is_cancelled() => debug!("heartbeat task cancelled"),
                Err(e) => error!(error = %e, "heartbeat task failed"),
            }
        }

        info!("runtime shutdown complete");
    }

    /// Blocks until someone sends on the shutdown channel, then shuts
    /// down.
    pub async fn wait_for_shutdown(self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("shutdown signal received, runtime terminating");
        self.shutdown().await;
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<SpyglassRuntime>;
    let _ = assert_sync::<SpyglassRuntime>;
};
