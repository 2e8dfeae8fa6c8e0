//! WebSocket transport for the realtime push channel.
//!
//! The registry owns all client state; this module only moves frames
//! between the socket and the registry's per-client channel. One writer
//! task per connection drains the outbound channel; the read loop feeds
//! client frames through the rate limiter and into the registry.
//!
//! Protocol (JSON text frames):
//!
//! ```text
//! client -> server   { "type": "subscribe",   "topic": "blocks" }
//!                    { "type": "unsubscribe", "topic": "blocks" }
//!                    { "type": "ping" }
//!                    { "type": "pong" }            heartbeat ack
//! server -> client   { "type": "subscribed" | "unsubscribed" | "pong" | "ping" | "error", ... }
//! ```
//!
//! Every inbound text frame counts against the client's rate window.
//! Hitting the violation limit closes the connection with a policy
//! close frame.

use crate::router::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use spyglass_core::realtime::{ChannelRegistry, RateDecision, RealtimeError};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames clients may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Ping,
    Pong,
}

/// Why a connection's read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    /// The client closed, vanished or errored.
    Client,
    /// Rate-limit violations crossed the limit.
    Policy,
}

/// `GET /ws`
pub async fn handle_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let registry = Arc::clone(state.service.registry());
    ws.on_upgrade(move |socket| drive_connection(socket, registry))
}

/// Runs one connection to completion: registers the client, pumps
/// outbound frames, reads inbound frames, and unregisters on the way
/// out.
async fn drive_connection(socket: WebSocket, registry: Arc<ChannelRegistry>) {
    let (client, mut outbound) = registry.register();
    info!(client = %client, "websocket connected");

    let (mut sink, stream) = socket.split();
    let mut reader = tokio::spawn(read_client_frames(stream, Arc::clone(&registry), client));

    let disconnect = loop {
        tokio::select! {
            maybe_frame = outbound.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if sink.send(Message::Text(frame.into())).await.is_err() {
                            break Disconnect::Client;
                        }
                    }
                    // Channel closed: the registry dropped this client,
                    // typically for a missed heartbeat.
                    None => break Disconnect::Client,
                }
            }
            result = &mut reader => {
                break result.unwrap_or(Disconnect::Client);
            }
        }
    };

    // Flush queued frames so a policy warning reaches the client before
    // the close frame does.
    while let Ok(frame) = outbound.try_recv() {
        if sink.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
    let close = match disconnect {
        Disconnect::Policy => Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "too many rate limit violations".into(),
        })),
        Disconnect::Client => Message::Close(None),
    };
    let _ = sink.send(close).await;

    reader.abort();
    registry.unregister(client);
    info!(client = %client, "websocket disconnected");
}

/// Reads frames until the client goes away or earns a disconnect.
async fn read_client_frames(
    mut stream: SplitStream<WebSocket>,
    registry: Arc<ChannelRegistry>,
    client: Uuid,
) -> Disconnect {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                debug!(client = %client, error = %error, "websocket receive error");
                return Disconnect::Client;
            }
        };

        match message {
            Message::Text(text) => {
                if let Some(disconnect) = handle_client_frame(&registry, client, text.as_str()) {
                    return disconnect;
                }
            }
            // Protocol-level pong also counts as a heartbeat ack.
            Message::Pong(_) => registry.mark_pong(client),
            Message::Close(_) => return Disconnect::Client,
            // Protocol pings are answered by axum; binary is not part of
            // the protocol.
            Message::Ping(_) | Message::Binary(_) => {}
        }
    }
    Disconnect::Client
}

/// Rate-checks and dispatches one text frame. `Some` means the
/// connection must end.
fn handle_client_frame(
    registry: &ChannelRegistry,
    client: Uuid,
    raw: &str,
) -> Option<Disconnect> {
    if let RateDecision::Rejected { violations } = registry.check_rate_limit(client) {
        warn!(client = %client, violations, "websocket frame rate limited");
        send_json(
            registry,
            client,
            &json!({ "type": "error", "error": "rate_limited", "violations": violations }),
        );
        if violations >= registry.violation_limit() {
            return Some(Disconnect::Policy);
        }
        return None;
    }

    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(_) => {
            send_json(registry, client, &json!({ "type": "error", "error": "invalid_frame" }));
            return None;
        }
    };

    match frame {
        ClientFrame::Subscribe { topic } => match registry.subscribe(client, &topic) {
            Ok(()) => {
                send_json(registry, client, &json!({ "type": "subscribed", "topic": topic }));
            }
            Err(RealtimeError::SubscriptionLimit { limit }) => {
                send_json(
                    registry,
                    client,
                    &json!({ "type": "error", "error": "subscription_limit", "limit": limit }),
                );
            }
            Err(_) => return Some(Disconnect::Client),
        },
        ClientFrame::Unsubscribe { topic } => {
            if registry.unsubscribe(client, &topic).is_err() {
                return Some(Disconnect::Client);
            }
            send_json(registry, client, &json!({ "type": "unsubscribed", "topic": topic }));
        }
        ClientFrame::Ping => send_json(registry, client, &json!({ "type": "pong" })),
        ClientFrame::Pong => registry.mark_pong(client),
    }
    None
}

fn send_json(registry: &ChannelRegistry, client: Uuid, frame: &Value) {
    registry.send_to(client, frame.to_string());
}
