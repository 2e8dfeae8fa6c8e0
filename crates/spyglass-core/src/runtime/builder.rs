//! Builder assembling the gateway runtime from configuration.

use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::dedup::RequestDeduplicator;
use crate::pool::OperationPool;
use crate::realtime::ChannelRegistry;
use crate::service::ResourceService;
use crate::upstream::NodeClient;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::lifecycle::SpyglassRuntime;

/// Errors during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration missing or rejected by validation.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// A component failed to initialize.
    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
}

/// Knobs on the builder that are not part of the app configuration.
#[derive(Clone)]
struct RuntimeOptions {
    enable_cache_cleanup: bool,
    enable_heartbeat: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_cache_cleanup: true, enable_heartbeat: true, shutdown_channel_capacity: 16 }
    }
}

/// Builder for a [`SpyglassRuntime`].
///
/// This is the composition root: every component is constructed here and
/// handed down, nothing reaches for a global.
///
/// # Examples
///
/// ```no_run
/// # use spyglass_core::{config::AppConfig, runtime::SpyglassRuntimeBuilder};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
///
/// let runtime = SpyglassRuntimeBuilder::new().with_config(config).build()?;
/// # Ok(())
/// # }
/// ```
pub struct SpyglassRuntimeBuilder {
    config: Option<AppConfig>,
    options: RuntimeOptions,
}

impl SpyglassRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, options: RuntimeOptions::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Disables the periodic sweep of expired cache entries. Lookups
    /// still purge dead entries lazily.
    #[must_use]
    pub fn disable_cache_cleanup(mut self) -> Self {
        self.options.enable_cache_cleanup = false;
        self
    }

    /// Disables the WebSocket heartbeat task. Silent clients then stay
    /// connected until their socket drops.
    #[must_use]
    pub fn disable_heartbeat(mut self) -> Self {
        self.options.enable_heartbeat = false;
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    /// Builds the runtime, constructing every component and starting the
    /// background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] when configuration is missing or invalid,
    /// or a component rejects its settings.
    pub fn build(self) -> Result<SpyglassRuntime, RuntimeError> {
        let config = self.config.ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;

        config.validate().map_err(RuntimeError::ConfigValidation)?;

        info!(
            upstream = %config.upstream.base_url,
            cache_cleanup_enabled = self.options.enable_cache_cleanup,
            heartbeat_enabled = self.options.enable_heartbeat,
            "initializing runtime"
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);

        let cache = Arc::new(
            ResponseCache::new(config.cache.max_entries)
                .map_err(|e| RuntimeError::Initialization(format!("response cache: {e}")))?,
        );
        if self.options.enable_cache_cleanup {
            cache.start_cleanup(config.cleanup_interval());
        }
        debug!(
            max_entries = config.cache.max_entries,
            cleanup_enabled = self.options.enable_cache_cleanup,
            "response cache initialized"
        );

        let dedup = Arc::new(RequestDeduplicator::new());
        debug!("request deduplicator initialized");

        let pool = Arc::new(
            OperationPool::new(config.pool.max_concurrent, config.task_timeout())
                .map_err(|e| RuntimeError::Initialization(format!("operation pool: {e}")))?,
        );
        debug!(max_concurrent = config.pool.max_concurrent, "operation pool initialized");

        let node = Arc::new(
            NodeClient::new(&config.upstream)
                .map_err(|e| RuntimeError::Initialization(format!("node client: {e}")))?,
        );
        debug!(base_url = %config.upstream.base_url, "node client initialized");

        let registry = Arc::new(ChannelRegistry::new(config.realtime.clone()));
        let heartbeat_task = if self.options.enable_heartbeat {
            let handle = registry.start_heartbeat(&shutdown_tx);
            debug!(
                interval_seconds = config.realtime.heartbeat_interval_seconds,
                "heartbeat task started"
            );
            Some(handle)
        } else {
            debug!("heartbeat disabled");
            None
        };

        let service = ResourceService::new(
            Arc::clone(&cache),
            dedup,
            Arc::clone(&pool),
            node,
            registry,
            config.retry.clone(),
            config.cache_ttl(),
        );
        debug!("resource service initialized");

        let runtime =
            SpyglassRuntime::new(service, cache, pool, shutdown_tx, config, heartbeat_task);

        info!("runtime initialization complete");
        Ok(runtime)
    }
}

impl Default for SpyglassRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
