//! The WebSocket endpoint driven by a real client: subscription acks,
//! topic-scoped broadcasts, rate-limit warnings and the policy close
//! that follows too many violations.

use crate::helpers::{create_service, create_service_with, poll_until, ServiceOptions, TestServer};
use crate::mock_node::MockNode;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use spyglass_core::realtime::RealtimeConfig;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_backend() -> (MockNode, TestServer) {
    let node = MockNode::start().await.expect("mock node");
    let server =
        TestServer::start(create_service(&node.base_url())).await.expect("test server");
    (node, server)
}

async fn start_backend_with_realtime(realtime: RealtimeConfig) -> (MockNode, TestServer) {
    let node = MockNode::start().await.expect("mock node");
    let service = create_service_with(
        &node.base_url(),
        ServiceOptions { realtime, ..Default::default() },
    );
    let server = TestServer::start(service).await.expect("test server");
    (node, server)
}

async fn connect(server: &TestServer) -> Socket {
    let (socket, _) = connect_async(server.ws_url()).await.expect("ws connect");
    socket
}

async fn send_text(socket: &mut Socket, frame: &str) {
    socket.send(Message::Text(frame.into())).await.expect("send frame");
}

async fn next_json(socket: &mut Socket) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("frame before timeout")
        .expect("stream open")
        .expect("frame ok");
    match frame {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("json frame"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_subscribe_ack_and_broadcast_delivery() {
    let (_node, server) = start_backend().await;
    let mut socket = connect(&server).await;

    send_text(&mut socket, r#"{"type":"subscribe","topic":"blocks"}"#).await;
    let ack = next_json(&mut socket).await;
    assert_eq!(ack["type"], "subscribed");
    assert_eq!(ack["topic"], "blocks");

    let delivered = server.service.broadcast_new_block(&json!({"height": 7}));
    assert_eq!(delivered, 1);

    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "new_block");
    assert_eq!(event["topic"], "blocks");
    assert_eq!(event["data"]["height"], 7);
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let (_node, server) = start_backend().await;
    let mut socket = connect(&server).await;

    send_text(&mut socket, r#"{"type":"ping"}"#).await;
    assert_eq!(next_json(&mut socket).await["type"], "pong");
}

#[tokio::test]
async fn test_broadcasts_stay_within_their_topic() {
    let (_node, server) = start_backend().await;
    let mut socket = connect(&server).await;

    send_text(&mut socket, r#"{"type":"subscribe","topic":"transactions"}"#).await;
    assert_eq!(next_json(&mut socket).await["type"], "subscribed");

    assert_eq!(server.service.broadcast_new_block(&json!({"height": 1})), 0);
    assert_eq!(server.service.broadcast_new_transaction(&json!({"hash": "0xaa"})), 1);

    // The only frame in flight is the transaction event.
    let event = next_json(&mut socket).await;
    assert_eq!(event["type"], "new_transaction");
    assert_eq!(event["data"]["hash"], "0xaa");
}

#[tokio::test]
async fn test_unsubscribe_is_acked_and_stops_delivery() {
    let (_node, server) = start_backend().await;
    let mut socket = connect(&server).await;

    send_text(&mut socket, r#"{"type":"subscribe","topic":"validators"}"#).await;
    assert_eq!(next_json(&mut socket).await["type"], "subscribed");

    send_text(&mut socket, r#"{"type":"unsubscribe","topic":"validators"}"#).await;
    assert_eq!(next_json(&mut socket).await["type"], "unsubscribed");

    assert_eq!(server.service.broadcast_validator_update(&json!({"set": 2})), 0);
}

#[tokio::test]
async fn test_invalid_frame_gets_error_reply() {
    let (_node, server) = start_backend().await;
    let mut socket = connect(&server).await;

    send_text(&mut socket, "not json").await;
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["error"], "invalid_frame");

    // The connection survives a malformed frame.
    send_text(&mut socket, r#"{"type":"ping"}"#).await;
    assert_eq!(next_json(&mut socket).await["type"], "pong");
}

#[tokio::test]
async fn test_subscription_limit_is_reported_not_fatal() {
    let (_node, server) = start_backend_with_realtime(RealtimeConfig {
        max_subscriptions_per_client: 1,
        ..Default::default()
    })
    .await;
    let mut socket = connect(&server).await;

    send_text(&mut socket, r#"{"type":"subscribe","topic":"blocks"}"#).await;
    assert_eq!(next_json(&mut socket).await["type"], "subscribed");

    send_text(&mut socket, r#"{"type":"subscribe","topic":"transactions"}"#).await;
    let rejected = next_json(&mut socket).await;
    assert_eq!(rejected["error"], "subscription_limit");
    assert_eq!(rejected["limit"], 1);

    send_text(&mut socket, r#"{"type":"ping"}"#).await;
    assert_eq!(next_json(&mut socket).await["type"], "pong");
}

#[tokio::test]
async fn test_rate_limit_violations_end_in_policy_close() {
    let (_node, server) = start_backend_with_realtime(RealtimeConfig {
        max_messages_per_second: 1,
        violation_limit: 2,
        ..Default::default()
    })
    .await;
    let mut socket = connect(&server).await;

    // One accepted message, then two violations within the same window.
    for _ in 0..3 {
        send_text(&mut socket, r#"{"type":"ping"}"#).await;
    }

    let mut warnings = 0;
    let close_code = loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("frame before timeout");
        match frame {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(text.as_str()).expect("json frame");
                if value["error"] == "rate_limited" {
                    warnings += 1;
                }
            }
            Some(Ok(Message::Close(Some(close)))) => break close.code,
            Some(Ok(_)) => {}
            Some(Err(_)) | None => panic!("connection ended without a close frame"),
        }
    };

    assert_eq!(close_code, CloseCode::Policy);
    assert_eq!(warnings, 2, "each violation is warned before the disconnect");
}

#[tokio::test]
async fn test_client_count_follows_connects_and_disconnects() {
    let (_node, server) = start_backend().await;

    let first = connect(&server).await;
    let second = connect(&server).await;

    let registry = server.service.registry().clone();
    poll_until("both clients registered", Duration::from_secs(2), || {
        registry.client_count() == 2
    })
    .await
    .expect("registration");

    drop(first);
    poll_until("disconnected client unregistered", Duration::from_secs(2), || {
        registry.client_count() == 1
    })
    .await
    .expect("unregistration");

    drop(second);
}
