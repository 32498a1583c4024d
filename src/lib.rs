//! Real-time notification hub for monitoring dashboards
//!
//! The `notify-hub` binary only serves the HTTP and WebSocket surface. Alert,
//! metrics and system traffic comes from the monitoring pipeline that embeds
//! this crate: it owns a `broadcast::Sender<MonitoringEvent>` and hands the
//! receiving side to a [`BridgeHandle`], which forwards every event into the hub.
//!
//! ```no_run
//! use notify_hub::{BridgeHandle, HubHandle, MonitoringEvent, config::HubConfig};
//! use notify_hub::protocol::{NoticeLevel, SystemNotice};
//!
//! # async fn wire() -> anyhow::Result<()> {
//! let hub = HubHandle::spawn(HubConfig::default());
//! let (events, event_rx) = tokio::sync::broadcast::channel(256);
//! let _bridge = BridgeHandle::spawn(hub.clone(), event_rx);
//!
//! events.send(MonitoringEvent::System(SystemNotice::new(
//!     NoticeLevel::Info,
//!     "maintenance",
//!     "collectors restart at 22:00",
//! )))?;
//! # Ok(())
//! # }
//! ```

pub mod actors;
pub mod api;
pub mod config;
pub mod error;
pub mod protocol;
pub mod util;

pub use actors::bridge::BridgeHandle;
pub use actors::client::{ClientEndpoint, ClientHandle, ClientId, ConnectionState};
pub use actors::hub::HubHandle;
pub use actors::messages::{BroadcastTarget, HubStats, MonitoringEvent};
pub use error::{HubError, HubResult};
pub use protocol::{ClientMessage, Envelope, EnvelopeKind};
