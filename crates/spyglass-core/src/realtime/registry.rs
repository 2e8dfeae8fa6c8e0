//! WebSocket client registry: subscriptions, broadcast fan-out and
//! heartbeat liveness.
//!
//! Each connected client gets an outbound mpsc channel; the socket's
//! writer task drains it. Broadcast delivery is best-effort per
//! connection: a slow or closed client loses the frame, nobody else is
//! affected and the broadcaster never sees an error.
//!
//! Heartbeat protocol: every cycle the registry pings each client and
//! marks it as owing a pong. A client still marked when the next cycle
//! fires is closed by dropping its channel, which ends its writer task.

use crate::realtime::rate_limit::{RateDecision, RateLimiter};
use crate::realtime::{RealtimeConfig, RealtimeError};
use ahash::RandomState;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Point-in-time registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_clients: usize,
    /// Subscriber count per topic.
    pub subscriptions_by_topic: HashMap<String, usize>,
    /// Cumulative rate-limit violations since startup.
    pub violations_total: u64,
}

struct ClientConnection {
    sender: mpsc::Sender<String>,
    subscriptions: HashSet<String, RandomState>,
    awaiting_pong: bool,
}

/// Registry of connected realtime clients.
pub struct ChannelRegistry {
    clients: DashMap<Uuid, ClientConnection, RandomState>,
    limiter: RateLimiter,
    config: RealtimeConfig,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(config: RealtimeConfig) -> Self {
        Self {
            clients: DashMap::with_hasher(RandomState::new()),
            limiter: RateLimiter::new(config.max_messages_per_second),
            config,
        }
    }

    /// Registers a new client and returns its id plus the outbound frame
    /// channel the socket writer should drain.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(self.config.client_buffer);
        let id = Uuid::new_v4();
        self.clients.insert(
            id,
            ClientConnection {
                sender,
                subscriptions: HashSet::with_hasher(RandomState::new()),
                awaiting_pong: false,
            },
        );
        debug!(client = %id, "realtime client connected");
        (id, receiver)
    }

    /// Drops a client and its rate-limit state. Closing the outbound
    /// channel is what ends the socket's writer task.
    pub fn unregister(&self, client: Uuid) {
        if self.clients.remove(&client).is_some() {
            debug!(client = %client, "realtime client disconnected");
        }
        self.limiter.remove(client);
    }

    /// Counts one inbound message against the client's window.
    pub fn check_rate_limit(&self, client: Uuid) -> RateDecision {
        self.limiter.check(client)
    }

    /// Violations in one window after which the boundary should
    /// disconnect the client.
    #[must_use]
    pub fn violation_limit(&self) -> u32 {
        self.config.violation_limit
    }

    /// Adds a subscription.
    ///
    /// Re-subscribing to a held topic is a no-op success. A client at its
    /// subscription cap gets an error and keeps its subscription set
    /// untouched.
    pub fn subscribe(&self, client: Uuid, topic: &str) -> Result<(), RealtimeError> {
        let mut connection =
            self.clients.get_mut(&client).ok_or(RealtimeError::UnknownClient(client))?;

        if connection.subscriptions.contains(topic) {
            return Ok(());
        }
        if connection.subscriptions.len() >= self.config.max_subscriptions_per_client {
            return Err(RealtimeError::SubscriptionLimit {
                limit: self.config.max_subscriptions_per_client,
            });
        }

        connection.subscriptions.insert(topic.to_string());
        debug!(client = %client, topic, "subscribed");
        Ok(())
    }

    /// Removes a subscription; removing one that is not held is fine.
    pub fn unsubscribe(&self, client: Uuid, topic: &str) -> Result<(), RealtimeError> {
        let mut connection =
            self.clients.get_mut(&client).ok_or(RealtimeError::UnknownClient(client))?;
        connection.subscriptions.remove(topic);
        Ok(())
    }

    /// Sends `message` to every client subscribed to `topic`, or to every
    /// client when `topic` is `None`. Returns how many clients the frame
    /// was handed to.
    pub fn broadcast(&self, message: &Value, topic: Option<&str>) -> usize {
        let payload = message.to_string();
        let mut delivered = 0;

        for entry in self.clients.iter() {
            let wants = topic.map_or(true, |t| entry.subscriptions.contains(t));
            if !wants {
                continue;
            }
            match entry.sender.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    // Full buffer or closed socket. Skip this client and
                    // keep going.
                    warn!(client = %entry.key(), "dropping broadcast frame for unreachable client");
                }
            }
        }

        delivered
    }

    /// Hands one frame to a single client. Returns whether the frame was
    /// accepted; a full buffer or unknown client loses it, same as
    /// [`broadcast`](Self::broadcast).
    pub fn send_to(&self, client: Uuid, frame: String) -> bool {
        self.clients
            .get(&client)
            .map_or(false, |connection| connection.sender.try_send(frame).is_ok())
    }

    /// Records a heartbeat ack from the client.
    pub fn mark_pong(&self, client: Uuid) {
        if let Some(mut connection) = self.clients.get_mut(&client) {
            connection.awaiting_pong = false;
        }
    }

    /// Runs one heartbeat cycle: closes every client that never acked the
    /// previous ping, then pings the rest. Returns the closed client ids.
    pub fn heartbeat_cycle(&self) -> Vec<Uuid> {
        let ping = json!({ "type": "ping" }).to_string();
        let mut unresponsive = Vec::new();

        for mut entry in self.clients.iter_mut() {
            if entry.awaiting_pong {
                unresponsive.push(*entry.key());
            } else {
                entry.awaiting_pong = true;
                let _ = entry.sender.try_send(ping.clone());
            }
        }

        for client in &unresponsive {
            warn!(client = %client, "client missed heartbeat, closing connection");
            self.unregister(*client);
        }
        unresponsive
    }

    /// Spawns the periodic heartbeat task, stopped via the shutdown
    /// channel.
    pub fn start_heartbeat(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();
        let period = Duration::from_secs(self.config.heartbeat_interval_seconds);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Consume the immediate first tick so the first pings go out
            // one full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        debug!("heartbeat task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let closed = registry.heartbeat_cycle();
                        if !closed.is_empty() {
                            debug!(closed = closed.len(), "heartbeat closed unresponsive clients");
                        }
                    }
                }
            }
        })
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Returns a point-in-time stats snapshot.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut subscriptions_by_topic: HashMap<String, usize> = HashMap::new();
        for entry in self.clients.iter() {
            for topic in &entry.subscriptions {
                *subscriptions_by_topic.entry(topic.clone()).or_default() += 1;
            }
        }

        RegistryStats {
            total_clients: self.clients.len(),
            subscriptions_by_topic,
            violations_total: self.limiter.violations_total(),
        }
    }
}
