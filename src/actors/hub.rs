//! HubActor - Single owner of the client registry
//!
//! All registrations, unregistrations and broadcast fan-outs are serialized
//! through one command queue and processed by one task. Nothing else ever
//! mutates the registry, so no lock guards the client map.
//!
//! ## Dispatch
//!
//! ```text
//! broadcast_* → [command queue] → HubActor ─┬─ enqueue ok   → delivered
//!                                            └─ mailbox full → close + remove (evicted)
//! ```
//!
//! The hub never waits on client I/O: `enqueue` is a non-blocking push, and a
//! client that cannot keep up is disconnected instead of slowing everyone down.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::protocol::Envelope;

use super::client::{ClientActor, ClientHandle, ClientId, ConnectionConfig, Frame};
use super::messages::{BroadcastTarget, HubCommand, HubStats};

/// Actor that owns the registry of connected clients
pub struct HubActor {
    /// Registered clients by connection id
    clients: HashMap<ClientId, ClientHandle>,

    /// Connection ids per owning user
    users: HashMap<Arc<str>, HashSet<ClientId>>,

    /// Command receiver
    command_rx: mpsc::Receiver<HubCommand>,

    /// Lifetime counters
    stats: HubStats,
}

impl HubActor {
    pub fn new(command_rx: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            clients: HashMap::new(),
            users: HashMap::new(),
            command_rx,
            stats: HubStats::default(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or every handle is dropped.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        info!("starting notification hub");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                HubCommand::Register { handle, respond_to } => {
                    let result = self.register(handle);
                    let _ = respond_to.send(result);
                }

                HubCommand::Unregister { id, respond_to } => {
                    let removed = self.remove(id);
                    if removed {
                        debug!("unregistered client {id}");
                    } else {
                        trace!("client {id} already unregistered");
                    }
                    if let Some(respond_to) = respond_to {
                        let _ = respond_to.send(removed);
                    }
                }

                HubCommand::Broadcast { target, envelope } => {
                    self.dispatch(&target, &envelope);
                }

                HubCommand::CountClients { topic, respond_to } => {
                    let count = match topic {
                        Some(topic) => self
                            .clients
                            .values()
                            .filter(|client| client.is_subscribed(&topic))
                            .count(),
                        None => self.clients.len(),
                    };
                    let _ = respond_to.send(count);
                }

                HubCommand::GetStats { respond_to } => {
                    let _ = respond_to.send(self.snapshot_stats());
                }

                HubCommand::Shutdown { respond_to } => {
                    info!("received shutdown command");
                    self.close_all();
                    // closed before replying so callers observe the shutdown immediately
                    self.command_rx.close();
                    let _ = respond_to.send(Ok(()));
                    break;
                }
            }
        }

        // reject whatever is still queued, later sends fail on the closed queue
        self.command_rx.close();
        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                HubCommand::Register { handle, respond_to } => {
                    handle.close();
                    let _ = respond_to.send(Err(HubError::ShutDown));
                }
                HubCommand::Shutdown { respond_to } => {
                    let _ = respond_to.send(Err(HubError::ShutDown));
                }
                _ => {}
            }
        }
        self.close_all();

        info!("notification hub stopped");
    }

    fn register(&mut self, handle: ClientHandle) -> HubResult<()> {
        let id = handle.id();

        if self.clients.contains_key(&id) {
            warn!("rejecting duplicate registration of client {id}");
            return Err(HubError::AlreadyRegistered(id));
        }

        if handle.is_closed() {
            debug!("client {id} closed before registration");
            return Err(HubError::ClientClosed(id));
        }

        if let Some(user) = handle.user_key() {
            self.users.entry(user.clone()).or_default().insert(id);
        }

        info!(
            "registered client {id} (user: {})",
            handle.user_id().unwrap_or("-")
        );

        let welcome = Envelope::welcome(id, handle.user_id());
        self.clients.insert(id, handle);
        self.stats.total_registered += 1;

        match welcome.encode() {
            Ok(frame) => {
                let delivered = self
                    .clients
                    .get(&id)
                    .is_some_and(|client| client.enqueue(frame.into()));
                if !delivered {
                    warn!("client {id} could not accept welcome, evicting");
                    self.evict(id);
                }
            }
            Err(e) => error!("failed to encode welcome for {id}: {e}"),
        }

        Ok(())
    }

    /// Remove a client, closing it. Returns whether it was registered.
    fn remove(&mut self, id: ClientId) -> bool {
        let Some(client) = self.clients.remove(&id) else {
            return false;
        };

        client.close();

        if let Some(user) = client.user_key()
            && let Some(connections) = self.users.get_mut(user)
        {
            connections.remove(&id);
            if connections.is_empty() {
                self.users.remove(user);
            }
        }

        self.stats.total_unregistered += 1;
        true
    }

    fn evict(&mut self, id: ClientId) {
        if self.remove(id) {
            self.stats.total_evicted += 1;
        }
    }

    #[instrument(skip_all, fields(kind = %envelope.kind(), target = %target))]
    fn dispatch(&mut self, target: &BroadcastTarget, envelope: &Envelope) {
        self.stats.total_broadcasts += 1;

        let frame: Frame = match envelope.encode() {
            Ok(text) => text.into(),
            Err(e) => {
                error!("failed to encode envelope {}: {e}", envelope.id());
                return;
            }
        };

        let mut delivered = 0;
        let mut overflowed = Vec::new();

        {
            let recipients: Vec<&ClientHandle> = match target {
                BroadcastTarget::All => self.clients.values().collect(),
                BroadcastTarget::Topic(topic) => self
                    .clients
                    .values()
                    .filter(|client| client.is_subscribed(topic))
                    .collect(),
                BroadcastTarget::User(user) => self
                    .users
                    .get(user.as_str())
                    .into_iter()
                    .flatten()
                    .filter_map(|id| self.clients.get(id))
                    .collect(),
            };

            for client in recipients {
                if client.enqueue(frame.clone()) {
                    delivered += 1;
                } else {
                    overflowed.push(client.id());
                }
            }
        }

        for id in overflowed {
            warn!("client {id} is not draining its mailbox, evicting");
            self.evict(id);
        }

        self.stats.total_delivered += delivered;
        trace!("delivered envelope {} to {delivered} client(s)", envelope.id());
    }

    fn snapshot_stats(&self) -> HubStats {
        let mut topics: BTreeMap<String, usize> = BTreeMap::new();
        for client in self.clients.values() {
            for topic in client.subscriptions() {
                *topics.entry(topic).or_default() += 1;
            }
        }

        HubStats {
            clients: self.clients.len(),
            users: self.users.len(),
            topics,
            ..self.stats.clone()
        }
    }

    fn close_all(&mut self) {
        if self.clients.is_empty() {
            return;
        }

        info!("closing {} client(s)", self.clients.len());
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
    }
}

/// Handle for talking to the HubActor
///
/// Cheap to clone; every clone feeds the same command queue.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    config: Arc<HubConfig>,
}

impl HubHandle {
    /// Spawn a new hub actor
    pub fn spawn(config: HubConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity.max(1));

        let actor = HubActor::new(cmd_rx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a freshly upgraded transport and start its connection loops
    ///
    /// `user_id` is the identity resolved at handshake, if any.
    pub async fn connect<W, R, E>(
        &self,
        writer: W,
        reader: R,
        user_id: Option<String>,
    ) -> HubResult<ClientId>
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send + 'static,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let (handle, endpoint) = ClientHandle::new(user_id, self.config.mailbox_capacity);
        let id = handle.id();

        self.register(handle).await?;

        ClientActor::new(
            endpoint,
            self.clone(),
            ConnectionConfig::from(self.config.as_ref()),
        )
        .spawn(writer, reader);

        Ok(id)
    }

    /// Admit a client; the hub unicasts a welcome envelope right after
    pub async fn register(&self, handle: ClientHandle) -> HubResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::Register {
                handle,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::ShutDown)?;

        rx.await.map_err(|_| HubError::ShutDown)?
    }

    /// Remove a client; returns whether it was still registered
    pub async fn unregister(&self, id: ClientId) -> HubResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::Unregister {
                id,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| HubError::ShutDown)?;

        rx.await.map_err(|_| HubError::ShutDown)
    }

    /// Fire-and-forget unregistration used by the connection loops
    pub(crate) async fn request_unregister(&self, id: ClientId) {
        if self
            .sender
            .send(HubCommand::Unregister {
                id,
                respond_to: None,
            })
            .await
            .is_err()
        {
            trace!("hub already stopped, nothing to unregister for {id}");
        }
    }

    pub async fn broadcast_all(&self, envelope: Envelope) -> HubResult<()> {
        self.broadcast(BroadcastTarget::All, envelope).await
    }

    pub async fn broadcast_topic(&self, topic: impl Into<String>, envelope: Envelope) -> HubResult<()> {
        self.broadcast(BroadcastTarget::Topic(topic.into()), envelope)
            .await
    }

    pub async fn broadcast_user(&self, user_id: impl Into<String>, envelope: Envelope) -> HubResult<()> {
        self.broadcast(BroadcastTarget::User(user_id.into()), envelope)
            .await
    }

    /// Queue a broadcast; delivery happens asynchronously in the hub task
    pub async fn broadcast(&self, target: BroadcastTarget, envelope: Envelope) -> HubResult<()> {
        self.sender
            .send(HubCommand::Broadcast { target, envelope })
            .await
            .map_err(|_| HubError::ShutDown)
    }

    /// Number of registered clients (0 once the hub is shut down)
    pub async fn count_clients(&self) -> usize {
        self.count(None).await
    }

    /// Number of registered clients subscribed to `topic`
    pub async fn count_clients_by_topic(&self, topic: impl Into<String>) -> usize {
        self.count(Some(topic.into())).await
    }

    async fn count(&self, topic: Option<String>) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(HubCommand::CountClients {
                topic,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or_default()
    }

    /// Registry statistics, `None` once the hub is shut down
    pub async fn stats(&self) -> Option<HubStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::GetStats { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Close every client and stop the hub
    ///
    /// Only the first call succeeds; afterwards every operation is rejected.
    pub async fn shutdown(&self) -> HubResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::Shutdown { respond_to: tx })
            .await
            .map_err(|_| HubError::ShutDown)?;

        rx.await.map_err(|_| HubError::ShutDown)?
    }

    /// Whether the hub task has stopped accepting commands
    pub fn is_shut_down(&self) -> bool {
        self.sender.is_closed()
    }
}
