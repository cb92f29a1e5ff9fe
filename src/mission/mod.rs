//! Leader-only orchestration.
//!
//! A [`Mission`] is launched exactly once per tenure, never once per
//! heartbeat. `launch` runs inside the election loop and must return
//! promptly: real work goes into spawned tasks, which must stop on their own
//! once the tenure is over (shutdown or abdication). Nothing else stops them.
//!
//! # Example
//!
//! ```no_run
//! use dictator::mission::{Mission, TenureContext};
//!
//! struct Announce;
//!
//! impl Mission for Announce {
//!     fn launch(&self, mut tenure: TenureContext) {
//!         tokio::spawn(async move {
//!             if tenure.send_command("Hello", ()).await.is_err() {
//!                 return;
//!             }
//!             while let Some(response) = tenure.next_response().await {
//!                 tracing::info!(?response, "Got response");
//!             }
//!         });
//!     }
//! }
//! ```

pub mod bootstrap;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{DictatorError, Result};
use crate::protocol::{new_command_packet, Envelope, NodeId};
use crate::transport::Packet;

pub use bootstrap::{bootstrap_router, BootstrapMission};

pub trait Mission: Send + Sync {
    fn launch(&self, tenure: TenureContext);
}

impl<F> Mission for F
where
    F: Fn(TenureContext) + Send + Sync,
{
    fn launch(&self, tenure: TenureContext) {
        self(tenure)
    }
}

/// Everything a mission may use during one tenure.
#[derive(Debug)]
pub struct TenureContext {
    node_id: NodeId,
    outbound: mpsc::Sender<Packet>,
    shutdown: CancellationToken,
    abdication: CancellationToken,
    responses: mpsc::Receiver<Envelope>,
}

impl TenureContext {
    pub(crate) fn new(
        node_id: NodeId,
        outbound: mpsc::Sender<Packet>,
        shutdown: CancellationToken,
        abdication: CancellationToken,
        responses: mpsc::Receiver<Envelope>,
    ) -> Self {
        Self {
            node_id,
            outbound,
            shutdown,
            abdication,
            responses,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn outbound(&self) -> &mpsc::Sender<Packet> {
        &self.outbound
    }

    /// Process-wide shutdown. Cancelling it stops the whole node.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn abdication_token(&self) -> &CancellationToken {
        &self.abdication
    }

    pub fn is_over(&self) -> bool {
        self.shutdown.is_cancelled() || self.abdication.is_cancelled()
    }

    /// Resolves when the tenure ends, by shutdown or abdication.
    pub async fn ended(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.abdication.cancelled() => {}
        }
    }

    /// Gives up leadership voluntarily.
    pub fn abdicate(&self) {
        self.abdication.cancel();
    }

    /// Sends a packet unless the tenure ends first.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DictatorError::ChannelClosed),
            _ = self.abdication.cancelled() => Err(DictatorError::ChannelClosed),
            sent = self.outbound.send(packet) => sent.map_err(|_| DictatorError::ChannelClosed),
        }
    }

    /// Broadcasts a command issued by this node.
    pub async fn send_command<V: Serialize>(&self, name: &str, value: V) -> Result<()> {
        let packet = new_command_packet(&self.node_id, name, value)?;
        self.send(packet).await
    }

    /// Next command response addressed to this node, or `None` once the
    /// tenure is over.
    pub async fn next_response(&mut self) -> Option<Envelope> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            _ = self.abdication.cancelled() => None,
            response = self.responses.recv() => response,
        }
    }
}
