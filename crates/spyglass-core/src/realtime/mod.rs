//! Realtime subscription hub.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     ChannelRegistry                        │
//! │                                                            │
//! │  socket ──register──▶ client entry ──mpsc──▶ writer task   │
//! │  inbound frame ──▶ RateLimiter ──▶ accept / reject         │
//! │  broadcast(topic) ──▶ fan-out to subscribed clients        │
//! │  heartbeat tick ──▶ close silent clients, ping the rest    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry owns subscription state and per-client rate windows. It
//! never touches sockets directly: the transport layer registers each
//! connection, forwards inbound frames through [`ChannelRegistry::check_rate_limit`]
//! and drains the outbound channel into the socket. Disconnecting a
//! client that keeps violating its rate window is the transport's call,
//! made against [`ChannelRegistry::violation_limit`].

pub mod rate_limit;
pub mod registry;

pub use rate_limit::{RateDecision, RateLimiter};
pub use registry::{ChannelRegistry, RegistryStats};

use serde::Deserialize;
use uuid::Uuid;

/// Errors surfaced to realtime clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    /// The client exceeded its per-window message budget. Non-fatal; the
    /// message is dropped and the client told to slow down.
    #[error("Rate limit exceeded ({violations} violations this window)")]
    RateLimited { violations: u32 },

    /// The client is at its subscription cap.
    #[error("Subscription limit reached ({limit} topics)")]
    SubscriptionLimit { limit: usize },

    /// Operation referenced a client the registry does not know.
    #[error("Unknown client: {0}")]
    UnknownClient(Uuid),
}

fn default_max_messages_per_second() -> u32 {
    10
}

fn default_max_subscriptions_per_client() -> usize {
    20
}

fn default_violation_limit() -> u32 {
    5
}

fn default_heartbeat_interval_seconds() -> u64 {
    30
}

fn default_client_buffer() -> usize {
    64
}

/// Realtime hub configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Inbound messages a client may send per one-second window.
    #[serde(default = "default_max_messages_per_second")]
    pub max_messages_per_second: u32,

    /// Topics a single client may hold subscriptions to.
    #[serde(default = "default_max_subscriptions_per_client")]
    pub max_subscriptions_per_client: usize,

    /// Violations within one window after which the transport disconnects
    /// the client.
    #[serde(default = "default_violation_limit")]
    pub violation_limit: u32,

    /// Seconds between heartbeat pings.
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    /// Outbound frame buffer per client; a client this far behind starts
    /// losing broadcast frames.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_messages_per_second: default_max_messages_per_second(),
            max_subscriptions_per_client: default_max_subscriptions_per_client(),
            violation_limit: default_violation_limit(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            client_buffer: default_client_buffer(),
        }
    }
}
