//! Integration tests for API endpoints
//!
//! These tests run the real server on a random port and verify:
//! - REST endpoints return correct responses
//! - WebSocket clients get a welcome and live broadcasts
//! - Identity tokens are resolved at handshake

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header, encode};
use notify_hub::{
    HubHandle,
    api::{ApiConfig, ApiState, IdentityResolver, identity::Claims, spawn_api_server},
    protocol::{AlertNotice, Envelope, Severity, topics},
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};

use crate::helpers::*;

const SECRET: &str = "integration-test-secret-with-enough-length";

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// Helper to create test API server
async fn spawn_test_api() -> (SocketAddr, HubHandle) {
    let hub = HubHandle::spawn(test_hub_config(64));
    let state = ApiState::new(hub.clone(), IdentityResolver::new(Some(SECRET)));

    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(), // Random port
        enable_cors: true,
    };

    let addr = spawn_api_server(config, state).await.unwrap();
    (addr, hub)
}

fn token(sub: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _hub) = spawn_test_api().await;

    let response = reqwest::get(format!("http://{addr}/api/v1/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clients"], 0);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_health_reports_shutdown() {
    let (addr, hub) = spawn_test_api().await;
    hub.shutdown().await.unwrap();

    let response = reqwest::get(format!("http://{addr}/api/v1/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "shutting_down");
}

#[tokio::test]
async fn test_stats_endpoint() {
    let (addr, _hub) = spawn_test_api().await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();
    next_json(&mut socket).await; // welcome

    let body: Value = reqwest::get(format!("http://{addr}/api/v1/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["hub"]["clients"], 1);
    assert_eq!(body["hub"]["total_registered"], 1);
}

#[tokio::test]
async fn test_clients_endpoint_with_topic_filter() {
    let (addr, hub) = spawn_test_api().await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();
    next_json(&mut socket).await; // welcome
    socket
        .send(Message::Text(
            json!({"type": "subscribe", "data": {"topics": ["metrics"]}}).to_string(),
        ))
        .await
        .unwrap();
    wait_for_subscribers(&hub, topics::METRICS, 1).await;

    let client = reqwest::Client::new();

    let all: Value = client
        .get(format!("http://{addr}/api/v1/clients"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all, json!({"count": 1}));

    let metrics: Value = client
        .get(format!("http://{addr}/api/v1/clients?topic=metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics, json!({"topic": "metrics", "count": 1}));

    let alerts: Value = client
        .get(format!("http://{addr}/api/v1/clients?topic=alerts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(alerts["count"], 0);

    let invalid = client
        .get(format!("http://{addr}/api/v1/clients?topic="))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_websocket_anonymous_welcome_and_alert() {
    let (addr, hub) = spawn_test_api().await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();

    let welcome = next_json(&mut socket).await;
    assert_eq!(welcome["data"]["title"], "welcome");
    assert!(
        welcome["data"]["userId"]
            .as_str()
            .is_some_and(|user| user.starts_with("anonymous-"))
    );

    socket
        .send(Message::Text(
            r#"{"type":"subscribe","data":{"action":"subscribe","topics":["alerts"]}}"#.to_string(),
        ))
        .await
        .unwrap();
    wait_for_subscribers(&hub, topics::ALERTS, 1).await;

    let alert = AlertNotice {
        alert: json!({"id": 1}),
        rule: json!({"name": "cpu"}),
        severity: Severity::Critical,
        message: "cpu above 95%".to_string(),
    };
    hub.broadcast_topic(topics::ALERTS, Envelope::alert(&alert))
        .await
        .unwrap();

    let received = next_json(&mut socket).await;
    assert_eq!(received["type"], "alert");
    assert_eq!(received["data"]["severity"], "critical");
    assert_eq!(received["data"]["message"], "cpu above 95%");
}

#[tokio::test]
async fn test_websocket_identity_from_bearer_header() {
    let (addr, hub) = spawn_test_api().await;

    let mut request = format!("ws://{addr}/api/v1/stream")
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", token("alice"))).unwrap(),
    );
    let (mut socket, _) = connect_async(request).await.unwrap();

    let welcome = next_json(&mut socket).await;
    assert_eq!(welcome["data"]["userId"], "alice");

    hub.broadcast_user(
        "alice",
        Envelope::system(&notify_hub::protocol::SystemNotice::new(
            notify_hub::protocol::NoticeLevel::Info,
            "report",
            "your report is ready",
        )),
    )
    .await
    .unwrap();

    let notice = next_json(&mut socket).await;
    assert_eq!(notice["data"]["content"], "your report is ready");
}

#[tokio::test]
async fn test_websocket_identity_from_query_token() {
    let (addr, _hub) = spawn_test_api().await;

    let (mut socket, _) = connect_async(format!(
        "ws://{addr}/api/v1/stream?token={}",
        token("bob")
    ))
    .await
    .unwrap();

    let welcome = next_json(&mut socket).await;
    assert_eq!(welcome["data"]["userId"], "bob");
}

#[tokio::test]
async fn test_websocket_disconnect_unregisters() {
    let (addr, hub) = spawn_test_api().await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/api/v1/stream"))
        .await
        .unwrap();
    next_json(&mut socket).await; // welcome
    assert_eq!(hub.count_clients().await, 1);

    socket.close(None).await.unwrap();
    drop(socket);

    wait_for_clients(&hub, 0).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(hub.stats().await.unwrap().total_unregistered, 1);
}
