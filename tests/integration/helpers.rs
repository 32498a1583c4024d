//! Shared helpers for integration tests
//!
//! Connections are driven over in-memory channel transports so the client
//! loops can be exercised without sockets.

#![allow(dead_code)]

use std::time::Duration;

use axum::extract::ws::Message;
use futures::StreamExt;
use futures::channel::mpsc;
use notify_hub::{
    ClientHandle, ClientId, HubHandle,
    actors::client::{ClientActor, ClientTasks, ConnectionConfig},
    config::HubConfig,
};
use serde_json::Value;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(3);

/// The far end of an in-memory connection
pub struct Peer {
    /// Frames the peer sends to the hub
    pub inbound: mpsc::UnboundedSender<Result<Message, String>>,
    /// Frames the hub wrote to the peer
    pub outbound: mpsc::Receiver<Message>,
}

impl Peer {
    pub fn send_text(&self, text: &str) {
        self.inbound
            .unbounded_send(Ok(Message::Text(text.to_string())))
            .unwrap();
    }

    pub fn send(&self, message: Message) {
        self.inbound.unbounded_send(Ok(message)).unwrap();
    }

    /// Next raw frame written by the hub
    pub async fn next_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.outbound.next())
            .await
            .expect("timed out waiting for a frame")
    }

    /// Next text frame, parsed as JSON, skipping heartbeat pings
    pub async fn next_json(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Message::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(Message::Ping(_)) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Read frames until the hub sends a close frame or ends the stream
    pub async fn wait_for_close(&mut self) {
        loop {
            match self.next_frame().await {
                Some(Message::Close(_)) | None => return,
                Some(_) => continue,
            }
        }
    }
}

/// Build the transport halves for a connection plus the peer that drives them
pub fn transport() -> (
    mpsc::Sender<Message>,
    mpsc::UnboundedReceiver<Result<Message, String>>,
    Peer,
) {
    let (writer, outbound) = mpsc::channel(64);
    let (inbound, reader) = mpsc::unbounded();
    (writer, reader, Peer { inbound, outbound })
}

/// Hub settings for tests
pub fn test_hub_config(mailbox_capacity: usize) -> HubConfig {
    HubConfig {
        mailbox_capacity,
        ..HubConfig::default()
    }
}

/// Connection timings short enough for tests
pub fn fast_connection() -> ConnectionConfig {
    ConnectionConfig {
        ping_interval: Duration::from_millis(100),
        read_timeout: Duration::from_millis(400),
        write_timeout: Duration::from_millis(200),
    }
}

/// Register a connection and start its loops with explicit timings
pub async fn connect_with(
    hub: &HubHandle,
    user_id: Option<&str>,
    mailbox_capacity: usize,
    config: ConnectionConfig,
) -> (ClientId, Peer, ClientTasks) {
    let (handle, endpoint) = ClientHandle::new(user_id.map(str::to_string), mailbox_capacity);
    let id = handle.id();
    hub.register(handle).await.unwrap();

    let (writer, reader, peer) = transport();
    let tasks = ClientActor::new(endpoint, hub.clone(), config).spawn(writer, reader);

    (id, peer, tasks)
}

/// Poll until the hub reports `expected` clients
pub async fn wait_for_clients(hub: &HubHandle, expected: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let count = hub.count_clients().await;
        if count == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected} clients, hub reports {count}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `topic` has `expected` subscribers
pub async fn wait_for_subscribers(hub: &HubHandle, topic: &str, expected: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let count = hub.count_clients_by_topic(topic).await;
        if count == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected} subscribers of {topic}, hub reports {count}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
