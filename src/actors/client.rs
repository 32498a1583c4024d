//! Client connection actor - one per live dashboard connection
//!
//! A connection is split into two halves:
//!
//! - [`ClientHandle`]: the cheap, cloneable side the hub keeps in its registry.
//!   It only offers `enqueue`, `is_subscribed` and `close`.
//! - [`ClientEndpoint`]: the side owned by the connection itself. It holds the
//!   receiving end of the mailbox and is the only writer of the subscription set.
//!
//! [`ClientActor`] drives an endpoint over a transport with two independent
//! tasks:
//!
//! ```text
//!              ┌──────────────┐  enqueue (try_send)  ┌─────────────┐
//!   Hub ──────►│ ClientHandle │─────────────────────►│   mailbox   │
//!              └──────────────┘                      └──────┬──────┘
//!                     ▲ is_subscribed                       │ recv
//!                     │                              ┌──────▼──────┐
//!            subscriptions set ◄── reader loop       │ writer loop │──► transport
//!                                  ▲                 └─────────────┘   (+ heartbeat pings)
//!                      transport ──┘
//! ```
//!
//! Either loop terminating closes the connection and asks the hub to
//! unregister it. The hub treats duplicate requests as no-ops.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::protocol::{ClientMessage, Envelope};

use super::hub::HubHandle;

/// A serialized envelope waiting in a mailbox
///
/// Broadcasts serialize once and share the text between all recipients.
pub type Frame = Arc<str>;

/// Opaque connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Heartbeat and deadline settings for a single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl From<&HubConfig> for ConnectionConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&HubConfig::default())
    }
}

/// State shared between the hub-facing handle and the connection's own loops
struct Shared {
    subscriptions: RwLock<HashSet<String>>,
    state: AtomicU8,
    closed: watch::Sender<bool>,
}

/// Hub-facing side of a connection
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    user_id: Option<Arc<str>>,
    mailbox: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish()
    }
}

impl ClientHandle {
    /// Create a connection with a mailbox of `capacity` frames
    ///
    /// Returns the handle for the hub and the endpoint for the connection's loops.
    pub fn new(user_id: Option<String>, capacity: usize) -> (ClientHandle, ClientEndpoint) {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(capacity.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = ClientHandle {
            id: ClientId::new(),
            user_id: user_id.map(Arc::from),
            mailbox: mailbox_tx,
            shared: Arc::new(Shared {
                subscriptions: RwLock::new(HashSet::new()),
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                closed: closed_tx,
            }),
        };

        let endpoint = ClientEndpoint {
            handle: handle.clone(),
            mailbox: mailbox_rx,
            closed: closed_rx,
        };

        (handle, endpoint)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub(crate) fn user_key(&self) -> Option<&Arc<str>> {
        self.user_id.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.state() >= ConnectionState::Closing
    }

    /// Push a frame into the mailbox without waiting
    ///
    /// Returns `false` if the mailbox is full or the connection is going away.
    /// The hub treats `false` as an unhealthy client.
    pub fn enqueue(&self, frame: Frame) -> bool {
        if self.is_closed() {
            return false;
        }

        match self.mailbox.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(client = %self.id, "mailbox full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.shared.subscriptions.read().contains(topic)
    }

    /// Sorted copy of the current subscriptions
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.shared.subscriptions.read().iter().cloned().collect();
        topics.sort();
        topics
    }

    /// Signal both loops to stop and the transport to close. Idempotent.
    pub fn close(&self) {
        let _ = self
            .shared
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state < ConnectionState::Closing as u8).then_some(ConnectionState::Closing as u8)
            });
        self.shared.closed.send_replace(true);
    }

    fn mark_open(&self) {
        let _ = self.shared.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn mark_closed(&self) {
        self.shared
            .state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    fn add_subscriptions(&self, topics: impl IntoIterator<Item = String>) -> usize {
        let mut subscriptions = self.shared.subscriptions.write();
        topics
            .into_iter()
            .filter(|topic| subscriptions.insert(topic.clone()))
            .count()
    }

    fn remove_subscriptions(&self, topics: impl IntoIterator<Item = String>) -> usize {
        let mut subscriptions = self.shared.subscriptions.write();
        topics
            .into_iter()
            .filter(|topic| subscriptions.remove(topic))
            .count()
    }
}

/// Connection-owned side: mailbox receiver and subscription writer
pub struct ClientEndpoint {
    handle: ClientHandle,
    mailbox: mpsc::Receiver<Frame>,
    closed: watch::Receiver<bool>,
}

impl ClientEndpoint {
    pub fn id(&self) -> ClientId {
        self.handle.id
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    /// Add topics, returns how many were new
    pub fn subscribe<I, S>(&self, topics: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handle
            .add_subscriptions(topics.into_iter().map(Into::into))
    }

    /// Remove topics, returns how many were present
    pub fn unsubscribe<I, S>(&self, topics: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handle
            .remove_subscriptions(topics.into_iter().map(Into::into))
    }

    /// Wait for the next frame in the mailbox
    pub async fn recv(&mut self) -> Option<Frame> {
        self.mailbox.recv().await
    }

    /// Take the next frame if one is queued
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.mailbox.try_recv().ok()
    }

    /// Resolves once the connection has been asked to close
    pub async fn closed(&mut self) {
        wait_closed(&mut self.closed).await;
    }
}

/// Join handles of a connection's two loops
pub struct ClientTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// Drives a [`ClientEndpoint`] over a transport
pub struct ClientActor {
    endpoint: ClientEndpoint,
    hub: HubHandle,
    config: ConnectionConfig,
}

impl ClientActor {
    pub fn new(endpoint: ClientEndpoint, hub: HubHandle, config: ConnectionConfig) -> Self {
        Self {
            endpoint,
            hub,
            config,
        }
    }

    /// Spawn the reader and writer loops on the given transport halves
    pub fn spawn<W, R, E>(self, writer: W, reader: R) -> ClientTasks
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send + 'static,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let ClientEndpoint {
            handle,
            mailbox,
            closed,
        } = self.endpoint;

        handle.mark_open();

        let writer = tokio::spawn(write_loop(
            writer,
            mailbox,
            closed.clone(),
            handle.clone(),
            self.hub.clone(),
            self.config,
        ));
        let reader = tokio::spawn(read_loop(reader, closed, handle, self.hub, self.config));

        ClientTasks { reader, writer }
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // a dropped sender means the handle is gone, which also ends the connection
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn send_with_deadline<W>(
    writer: &mut W,
    message: Message,
    deadline: Duration,
) -> anyhow::Result<()>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match time::timeout(deadline, writer.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => anyhow::bail!("transport write failed: {e}"),
        Err(_) => anyhow::bail!("write deadline of {deadline:?} exceeded"),
    }
}

/// Write frames that were queued before the close, returns how many went out
///
/// The mailbox must already be closed so no new frames arrive while draining.
async fn flush_mailbox<W>(
    writer: &mut W,
    mailbox: &mut mpsc::Receiver<Frame>,
    deadline: Duration,
) -> usize
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut flushed = 0;
    while let Ok(frame) = mailbox.try_recv() {
        if let Err(e) = send_with_deadline(writer, Message::Text(frame.to_string()), deadline).await {
            debug!("stopped flushing: {e:#}");
            break;
        }
        flushed += 1;
    }
    flushed
}

#[instrument(skip_all, fields(client = %handle.id()))]
async fn write_loop<W>(
    mut writer: W,
    mut mailbox: mpsc::Receiver<Frame>,
    mut closed: watch::Receiver<bool>,
    handle: ClientHandle,
    hub: HubHandle,
    config: ConnectionConfig,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    debug!("starting writer loop");

    let mut heartbeat = time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // only a requested close leaves the transport usable for queued frames
    let mut flush = false;

    loop {
        tokio::select! {
            biased;

            _ = wait_closed(&mut closed) => {
                trace!("close requested");
                flush = true;
                break;
            }

            _ = heartbeat.tick() => {
                if let Err(e) = send_with_deadline(&mut writer, Message::Ping(Vec::new()), config.write_timeout).await {
                    warn!("heartbeat failed: {e:#}");
                    break;
                }
                trace!("sent heartbeat ping");
            }

            frame = mailbox.recv() => {
                let Some(frame) = frame else {
                    debug!("mailbox closed");
                    break;
                };

                if let Err(e) = send_with_deadline(&mut writer, Message::Text(frame.to_string()), config.write_timeout).await {
                    warn!("{e:#}");
                    break;
                }
            }
        }
    }

    handle.close();
    mailbox.close();

    if flush {
        let flushed = time::timeout(
            config.write_timeout,
            flush_mailbox(&mut writer, &mut mailbox, config.write_timeout),
        )
        .await
        .unwrap_or_default();
        trace!("flushed {flushed} queued frame(s) before closing");
    }

    // best effort, the peer may already be gone
    let _ = time::timeout(config.write_timeout, writer.send(Message::Close(None))).await;
    let _ = time::timeout(config.write_timeout, writer.close()).await;

    handle.mark_closed();
    hub.request_unregister(handle.id()).await;

    debug!("writer loop stopped");
}

#[instrument(skip_all, fields(client = %handle.id()))]
async fn read_loop<R, E>(
    mut reader: R,
    mut closed: watch::Receiver<bool>,
    handle: ClientHandle,
    hub: HubHandle,
    config: ConnectionConfig,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    debug!("starting reader loop");

    loop {
        // every received frame re-arms the idle deadline
        let next = tokio::select! {
            biased;

            _ = wait_closed(&mut closed) => {
                trace!("close requested");
                break;
            }

            next = time::timeout(config.read_timeout, reader.next()) => next,
        };

        match next {
            Err(_) => {
                warn!(
                    "no frame within {:?}, treating connection as dead",
                    config.read_timeout
                );
                break;
            }
            Ok(None) => {
                debug!("peer closed the stream");
                break;
            }
            Ok(Some(Err(e))) => {
                debug!("read failed: {e}");
                break;
            }
            Ok(Some(Ok(message))) => {
                if !handle_frame(&handle, message) {
                    debug!("received close frame");
                    break;
                }
            }
        }
    }

    handle.close();
    hub.request_unregister(handle.id()).await;

    debug!("reader loop stopped");
}

/// Returns `false` when the peer asked to close
fn handle_frame(handle: &ClientHandle, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            handle_control(handle, &text);
            true
        }
        Message::Binary(_) => {
            trace!("ignoring binary frame");
            true
        }
        // control frames only refresh the idle deadline
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => false,
    }
}

fn handle_control(handle: &ClientHandle, text: &str) {
    match ClientMessage::decode(text) {
        Ok(ClientMessage::Subscribe { topics }) => {
            let added = handle.add_subscriptions(topics);
            debug!(
                "subscribed to {added} new topic(s), now {:?}",
                handle.subscriptions()
            );
        }
        Ok(ClientMessage::Unsubscribe { topics }) => {
            let removed = handle.remove_subscriptions(topics);
            debug!(
                "unsubscribed from {removed} topic(s), now {:?}",
                handle.subscriptions()
            );
        }
        Ok(ClientMessage::Ping { id }) => match Envelope::pong(id).encode() {
            Ok(frame) => {
                if !handle.enqueue(frame.into()) {
                    warn!("mailbox full, dropping pong");
                }
            }
            Err(e) => warn!("failed to encode pong: {e}"),
        },
        Ok(ClientMessage::Unknown(kind)) => {
            debug!("ignoring message of unknown type '{kind}'");
        }
        Err(e) => {
            warn!("discarding inbound message: {e}");
        }
    }
}
