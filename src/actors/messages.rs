//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to a specific actor via mpsc
//! 2. **Events**: Broadcast notifications from the monitoring pipeline
//! 3. **Immutability**: Envelopes are shared, never mutated after construction

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::HubResult;
use crate::protocol::{AlertNotice, Envelope, MetricsUpdate, SystemNotice};

use super::client::{ClientHandle, ClientId};

/// Which registered clients a broadcast is addressed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTarget {
    /// Every registered client, regardless of subscriptions
    All,

    /// Clients subscribed to the topic at dispatch time
    Topic(String),

    /// Every connection owned by the user
    User(String),
}

impl std::fmt::Display for BroadcastTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastTarget::All => write!(f, "all"),
            BroadcastTarget::Topic(topic) => write!(f, "topic:{topic}"),
            BroadcastTarget::User(user) => write!(f, "user:{user}"),
        }
    }
}

/// Commands processed by the hub's coordinating task
///
/// Every registry mutation goes through this queue, so the hub task is the
/// only writer of registry state.
#[derive(Debug)]
pub enum HubCommand {
    /// Admit a client and unicast the welcome envelope
    Register {
        handle: ClientHandle,
        respond_to: oneshot::Sender<HubResult<()>>,
    },

    /// Remove a client if present
    ///
    /// Client loops send this without waiting for a reply.
    Unregister {
        id: ClientId,
        respond_to: Option<oneshot::Sender<bool>>,
    },

    /// Fan an envelope out to the matching clients
    Broadcast {
        target: BroadcastTarget,
        envelope: Envelope,
    },

    /// Count registered clients, optionally only those subscribed to a topic
    CountClients {
        topic: Option<String>,
        respond_to: oneshot::Sender<usize>,
    },

    /// Snapshot of registry statistics
    GetStats {
        respond_to: oneshot::Sender<HubStats>,
    },

    /// Close every client and stop the hub
    Shutdown {
        respond_to: oneshot::Sender<HubResult<()>>,
    },
}

/// Registry statistics reported by the hub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Currently registered clients
    pub clients: usize,

    /// Distinct users with at least one connection
    pub users: usize,

    /// Subscriber count per topic
    pub topics: BTreeMap<String, usize>,

    /// Clients admitted since startup
    pub total_registered: u64,

    /// Clients removed since startup (including evictions)
    pub total_unregistered: u64,

    /// Clients removed because their mailbox overflowed
    pub total_evicted: u64,

    /// Broadcast requests dispatched
    pub total_broadcasts: u64,

    /// Frames successfully enqueued into client mailboxes
    pub total_delivered: u64,
}

/// Event published by the monitoring pipeline (alert engine, collectors, scheduler)
///
/// Published on a tokio broadcast channel and forwarded into the hub by the
/// [`BridgeActor`](super::bridge::BridgeActor).
#[derive(Debug, Clone)]
pub enum MonitoringEvent {
    /// An alert fired or recovered
    Alert(AlertNotice),

    /// A metric batch was collected for a target
    Metrics(MetricsUpdate),

    /// Operator notice for every dashboard
    System(SystemNotice),

    /// Notice for the connections of a single user
    UserNotice { user_id: String, notice: SystemNotice },
}

/// Commands that can be sent to the BridgeActor
#[derive(Debug)]
pub enum BridgeCommand {
    /// Number of events forwarded into the hub so far
    GetForwarded { respond_to: oneshot::Sender<u64> },

    /// Stop forwarding
    Shutdown,
}
