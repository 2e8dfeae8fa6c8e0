//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in struct `Default` implementations
//! 2. **Config file**: TOML file, path taken from `SPYGLASS_CONFIG`
//! 3. **Environment variables**: `SPYGLASS_*` overrides for specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP bind address, concurrency and timeouts
//! - [`CacheSection`]: response cache sizing and TTL
//! - [`PoolSection`]: origin fetch pool bounds
//! - [`RetryPolicy`]: backoff schedule for origin fetches
//! - [`RealtimeConfig`]: WebSocket limits and heartbeat
//! - [`UpstreamConfig`]: origin node endpoint and client limits
//! - [`LoggingConfig`]: log level and format
//!
//! # Validation
//!
//! [`AppConfig::validate`] runs at startup; a zero cache size or a
//! malformed node URL fails fast instead of surfacing mid-request.
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! bind_port = 8080
//!
//! [upstream]
//! base_url = "http://127.0.0.1:26657"
//!
//! [cache]
//! ttl_seconds = 300
//! ```

use crate::realtime::RealtimeConfig;
use crate::retry::RetryPolicy;
use crate::upstream::UpstreamConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on. Must be greater than 0. Defaults to `8080`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// In-flight HTTP request cap. Defaults to `100`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Whole-request timeout in seconds. Defaults to `30`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Request body size cap in bytes. Defaults to 1 MiB.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

fn default_max_concurrent_requests() -> usize {
    100
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Entry cap; the oldest-inserted entry is evicted beyond it.
    /// Defaults to `1024`.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Entry time-to-live in seconds. Must be greater than 0. Defaults to
    /// `300`.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Seconds between background sweeps of expired entries. Defaults to
    /// `60`.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

fn default_max_entries() -> usize {
    1024
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_cleanup_interval_seconds() -> u64 {
    60
}

/// Origin fetch pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    /// Fetches running at once; the rest queue. Defaults to `8`.
    #[serde(default = "default_pool_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-fetch deadline in seconds, measured from start of execution.
    /// Defaults to `10`.
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
}

fn default_pool_max_concurrent() -> usize {
    8
}

fn default_task_timeout_seconds() -> u64 {
    10
}

/// Application logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error"). Defaults to
    /// `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root application configuration.
///
/// Loaded from TOML with environment overrides under the `SPYGLASS`
/// prefix, `__` separating nested fields
/// (e.g. `SPYGLASS_SERVER__BIND_PORT=8080`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Deployment environment name. Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Origin node endpoint and client limits.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Response cache sizing and TTL.
    #[serde(default)]
    pub cache: CacheSection,

    /// Origin fetch pool bounds.
    #[serde(default)]
    pub pool: PoolSection,

    /// Backoff schedule for origin fetches.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// WebSocket limits and heartbeat.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Log level and format.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_seconds: default_ttl_seconds(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_pool_max_concurrent(),
            task_timeout_seconds: default_task_timeout_seconds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            cache: CacheSection::default(),
            pool: PoolSection::default(),
            retry: RetryPolicy::default(),
            realtime: RealtimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment overrides.
    ///
    /// A missing file is fine; defaults and environment variables carry
    /// the whole configuration on their own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or a value
    /// cannot be deserialized into its field.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("environment", "development")?
            .set_default("server.bind_address", "127.0.0.1")?
            .set_default("server.bind_port", 8080)?
            .set_default("server.max_concurrent_requests", 100)?
            .set_default("server.request_timeout_seconds", 30)?
            .set_default("upstream.base_url", "http://127.0.0.1:26657")?
            .set_default("cache.max_entries", 1024)?
            .set_default("cache.ttl_seconds", 300)?
            .set_default("cache.cleanup_interval_seconds", 60)?
            .set_default("pool.max_concurrent", 8)?
            .set_default("pool.task_timeout_seconds", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("SPYGLASS").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or from the path in
    /// `SPYGLASS_CONFIG` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("SPYGLASS_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed bind address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns a descriptive string if address and port do not combine
    /// into a valid socket address.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port).parse().map_err(|_| {
            format!(
                "Invalid socket address: {}:{}",
                self.server.bind_address, self.server.bind_port
            )
        })
    }

    /// Response cache TTL as a [`Duration`].
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    /// Background sweep interval as a [`Duration`].
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache.cleanup_interval_seconds)
    }

    /// Per-fetch pool deadline as a [`Duration`].
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.pool.task_timeout_seconds)
    }

    /// HTTP request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Validates the configuration for correctness.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string on the first failed check.
    pub fn validate(&self) -> Result<(), String> {
        if self.upstream.base_url.trim().is_empty() {
            return Err("Upstream base_url must not be empty".to_string());
        }
        if !self.upstream.base_url.starts_with("http") {
            return Err(format!("Invalid upstream base_url: {}", self.upstream.base_url));
        }
        if self.upstream.concurrent_requests == 0 {
            return Err("Upstream concurrent_requests must be greater than 0".to_string());
        }

        if self.cache.max_entries == 0 {
            return Err("Cache max_entries must be greater than 0".to_string());
        }
        if self.cache.ttl_seconds == 0 {
            return Err("Cache TTL must be greater than 0".to_string());
        }
        if self.cache.cleanup_interval_seconds == 0 {
            return Err("Cache cleanup interval must be greater than 0".to_string());
        }

        if self.pool.max_concurrent == 0 {
            return Err("Pool max_concurrent must be greater than 0".to_string());
        }
        if self.pool.task_timeout_seconds == 0 {
            return Err("Pool task timeout must be greater than 0".to_string());
        }

        if self.realtime.max_messages_per_second == 0 {
            return Err("Realtime max_messages_per_second must be greater than 0".to_string());
        }
        if self.realtime.violation_limit == 0 {
            return Err("Realtime violation_limit must be greater than 0".to_string());
        }

        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }
        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
