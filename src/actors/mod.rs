//! Actor-based notification hub
//!
//! Each actor runs as an independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!   alert engine / collectors / scheduler
//!                  │ MonitoringEvent (broadcast)
//!          ┌───────▼───────┐
//!          │  BridgeActor  │
//!          └───────┬───────┘
//!                  │ broadcast_all / broadcast_topic / broadcast_user
//!          ┌───────▼───────┐        register / unregister
//!          │   HubActor    │◄──────────────────────────────┐
//!          │  (registry)   │                               │
//!          └───────┬───────┘                               │
//!                  │ enqueue (non-blocking)                │
//!      ┌───────────┼───────────┐                           │
//!      │           │           │                           │
//! ┌────▼────┐ ┌────▼────┐ ┌────▼────┐                      │
//! │ Client  │ │ Client  │ │ Client  │ reader + writer ─────┘
//! └─────────┘ └─────────┘ └─────────┘ loops per connection
//! ```
//!
//! ## Actor Types
//!
//! - **HubActor**: Owns the registry, dispatches broadcasts, evicts slow clients
//! - **ClientActor**: Reader and writer loops for one websocket connection
//! - **BridgeActor**: Forwards monitoring pipeline events into the hub
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: The monitoring pipeline publishes to a broadcast channel
//! 3. **Request/Response**: oneshot channels for queries

pub mod bridge;
pub mod client;
pub mod hub;
pub mod messages;
