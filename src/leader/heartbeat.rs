use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::protocol::{Envelope, NodeId};
use crate::transport::Packet;

/// Why a heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenureEnd {
    Shutdown,
    Abdicated,
}

/// Periodically broadcasts this node's heartbeat while it leads.
pub struct HeartbeatSender {
    node_id: NodeId,
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(node_id: NodeId, interval: Duration) -> Self {
        Self { node_id, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs until shutdown or abdication. The first heartbeat goes out one
    /// full period after start.
    pub async fn run(
        self,
        outbound: mpsc::Sender<Packet>,
        shutdown: CancellationToken,
        abdication: CancellationToken,
    ) -> TenureEnd {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!(node_id = %self.node_id, "Heartbeat stopped, shutting down");
                    return TenureEnd::Shutdown;
                }
                _ = abdication.cancelled() => {
                    tracing::debug!(node_id = %self.node_id, "Heartbeat stopped, abdicated");
                    return TenureEnd::Abdicated;
                }
                _ = ticker.tick() => {}
            }

            let packet = match Envelope::heartbeat(self.node_id.clone()).into_packet() {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::warn!(node_id = %self.node_id, error = %e, "Failed to encode heartbeat");
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = abdication.cancelled() => {}
                sent = outbound.send(packet) => {
                    if sent.is_err() {
                        tracing::warn!(node_id = %self.node_id, "Outbound channel closed, heartbeat skipped");
                    } else {
                        tracing::trace!(node_id = %self.node_id, "Heartbeat sent");
                    }
                }
            }
        }
    }
}
