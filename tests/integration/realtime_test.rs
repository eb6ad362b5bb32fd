//! Integration tests for WebSocket messaging across server instances.

use std::time::Duration;

use serde_json::json;

use beacon_api::handlers::ws::frame_cap;
use beacon_realtime::MemoryBus;

use crate::helpers::TestServer;

const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_cross_instance_delivery_without_echo() {
    let bus = MemoryBus::default();
    let first = TestServer::start(&bus).await;
    let second = TestServer::start(&bus).await;

    let mut x = first.connect().await;
    let mut y = second.connect().await;
    x.subscribe("chat:room1").await;
    y.subscribe("chat:room1").await;

    x.publish("chat:room1", json!({"text": "hi"})).await;

    let frame = y.recv().await;
    assert_eq!(frame["type"], "message");
    assert_eq!(frame["channel"], "chat:room1");
    assert_eq!(frame["payload"], json!({"text": "hi"}));

    assert!(x.recv_within(QUIET).await.is_none());
    assert!(y.recv_within(QUIET).await.is_none());
}

#[tokio::test]
async fn test_same_instance_delivery_skips_sender() {
    let bus = MemoryBus::default();
    let server = TestServer::start(&bus).await;

    let mut a = server.connect().await;
    let mut b = server.connect().await;
    a.subscribe("chat:room1").await;
    b.subscribe("chat:room1").await;

    a.publish("chat:room1", json!({"text": "hello"})).await;

    assert_eq!(b.recv().await["payload"]["text"], "hello");
    assert!(a.recv_within(QUIET).await.is_none());
    assert!(b.recv_within(QUIET).await.is_none());
}

#[tokio::test]
async fn test_unsubscribed_clients_receive_nothing() {
    let bus = MemoryBus::default();
    let first = TestServer::start(&bus).await;
    let second = TestServer::start(&bus).await;

    let mut x = first.connect().await;
    let mut y = second.connect().await;
    y.subscribe("chat:room2").await;

    x.publish("chat:room1", json!("not for you")).await;

    assert!(y.recv_within(QUIET).await.is_none());
}

#[tokio::test]
async fn test_invalid_frame_gets_error_reply() {
    let bus = MemoryBus::default();
    let server = TestServer::start(&bus).await;
    let mut client = server.connect().await;

    client.send(json!({"type": "dance"})).await;

    let frame = client.recv().await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_oversized_frame_gets_error_reply() {
    let bus = MemoryBus::default();
    let server = TestServer::start(&bus).await;
    let mut client = server.connect().await;

    let limit = server.engine.config().max_message_bytes;
    client.send_text("x".repeat(limit + 16)).await;

    let frame = client.recv().await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_frame_beyond_transport_cap_drops_connection() {
    let bus = MemoryBus::default();
    let server = TestServer::start(&bus).await;
    let mut client = server.connect().await;
    client.subscribe("bulk").await;
    assert_eq!(server.engine.registry().connection_count(), 1);

    let limit = server.engine.config().max_message_bytes;
    client.send_text("x".repeat(frame_cap(limit) * 4)).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while server.engine.registry().connection_count() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "connection survived an over-cap frame"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_disconnect_deregisters_connection() {
    let bus = MemoryBus::default();
    let server = TestServer::start(&bus).await;

    let mut client = server.connect().await;
    client.subscribe("presence").await;
    assert_eq!(server.engine.registry().connection_count(), 1);

    client.close().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while server.engine.registry().connection_count() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "connection still registered after close"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.engine.registry().channel_count(), 0);
}
