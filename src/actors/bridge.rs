//! BridgeActor - Forwards monitoring pipeline events into the hub
//!
//! The alert engine, the metric collectors and the scheduler publish
//! [`MonitoringEvent`]s on a tokio broadcast channel. The bridge subscribes and
//! turns each event into a hub broadcast:
//!
//! ```text
//! MonitoringEvent::Alert      → broadcast_topic("alerts")
//! MonitoringEvent::Metrics    → broadcast_topic("metrics")
//! MonitoringEvent::System     → broadcast_all
//! MonitoringEvent::UserNotice → broadcast_user(user_id)
//! ```
//!
//! A lagging bridge skips events rather than stalling publishers, which is
//! fine for a live feed.

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use crate::error::HubError;
use crate::protocol::{Envelope, topics};

use super::hub::HubHandle;
use super::messages::{BridgeCommand, MonitoringEvent};

/// Actor that forwards monitoring events to connected dashboards
pub struct BridgeActor {
    /// Hub receiving the broadcasts
    hub: HubHandle,

    /// Monitoring event receiver (broadcast subscription)
    event_rx: broadcast::Receiver<MonitoringEvent>,

    /// Command receiver
    command_rx: mpsc::Receiver<BridgeCommand>,

    /// Events forwarded so far
    forwarded: u64,
}

impl BridgeActor {
    pub fn new(
        hub: HubHandle,
        event_rx: broadcast::Receiver<MonitoringEvent>,
        command_rx: mpsc::Receiver<BridgeCommand>,
    ) -> Self {
        Self {
            hub,
            event_rx,
            command_rx,
            forwarded: 0,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting bridge actor");

        loop {
            tokio::select! {
                result = self.event_rx.recv() => {
                    match result {
                        Ok(event) => {
                            match self.forward(event).await {
                                Ok(()) => self.forwarded += 1,
                                Err(HubError::ShutDown) => {
                                    debug!("hub shut down, stopping bridge");
                                    break;
                                }
                                Err(e) => warn!("failed to forward event: {e}"),
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("bridge lagged, skipped {skipped} events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("event channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        BridgeCommand::GetForwarded { respond_to } => {
                            let _ = respond_to.send(self.forwarded);
                        }

                        BridgeCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("bridge actor stopped");
    }

    async fn forward(&self, event: MonitoringEvent) -> Result<(), HubError> {
        match event {
            MonitoringEvent::Alert(notice) => {
                trace!("forwarding {:?} alert", notice.severity);
                self.hub
                    .broadcast_topic(topics::ALERTS, Envelope::alert(&notice))
                    .await
            }
            MonitoringEvent::Metrics(update) => {
                trace!("forwarding metrics for {}", update.target_id);
                self.hub
                    .broadcast_topic(topics::METRICS, Envelope::metrics(&update))
                    .await
            }
            MonitoringEvent::System(notice) => {
                self.hub.broadcast_all(Envelope::system(&notice)).await
            }
            MonitoringEvent::UserNotice { user_id, notice } => {
                self.hub
                    .broadcast_user(user_id, Envelope::system(&notice))
                    .await
            }
        }
    }
}

/// Handle for controlling a BridgeActor
#[derive(Clone)]
pub struct BridgeHandle {
    sender: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Spawn a bridge from `event_rx` into `hub`
    pub fn spawn(hub: HubHandle, event_rx: broadcast::Receiver<MonitoringEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = BridgeActor::new(hub, event_rx, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Number of events forwarded into the hub
    pub async fn forwarded(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BridgeCommand::GetForwarded { respond_to: tx })
            .await
            .context("failed to send GetForwarded command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop forwarding events
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(BridgeCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
