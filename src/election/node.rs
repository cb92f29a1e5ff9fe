use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

use crate::config::ElectionConfig;
use crate::election::state::{ElectionState, Role};
use crate::election::timer::election_timeout;
use crate::error::{DictatorError, Result};
use crate::leader::{Tenure, TenureEnd};
use crate::mission::Mission;
use crate::protocol::{Envelope, Kind, NodeId};
use crate::router::CommandRouter;
use crate::transport::Packet;

/// Per-node state, owned and mutated only by the election loop.
///
/// Command handlers get a shared reference; everything else talks to the
/// loop through channels and cancellation tokens.
pub struct NodeContext {
    pub(crate) node_id: NodeId,
    pub(crate) config: ElectionConfig,
    pub(crate) outbound: mpsc::Sender<Packet>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) mission: Arc<dyn Mission>,
    router: Arc<CommandRouter>,
    role: Role,
    election: Pin<Box<Sleep>>,
    state_tx: watch::Sender<ElectionState>,
}

impl NodeContext {
    pub(crate) fn new(
        node_id: NodeId,
        config: ElectionConfig,
        shutdown: CancellationToken,
        outbound: mpsc::Sender<Packet>,
        router: Arc<CommandRouter>,
        mission: Arc<dyn Mission>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ElectionState::Pending);
        let election = Box::pin(tokio::time::sleep(election_timeout(&config)));

        Self {
            node_id,
            config,
            outbound,
            shutdown,
            mission,
            router,
            role: Role::Pending,
            election,
            state_tx,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn state(&self) -> ElectionState {
        *self.state_tx.borrow()
    }

    pub fn is_leading(&self) -> bool {
        self.role.is_leading()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn outbound(&self) -> &mpsc::Sender<Packet> {
        &self.outbound
    }

    /// Queues a packet without waiting. A full queue drops the packet, just
    /// as the network might.
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.outbound.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => DictatorError::OutboundFull,
            TrySendError::Closed(_) => DictatorError::ChannelClosed,
        })
    }

    fn publish(&self, state: ElectionState) {
        self.state_tx.send_replace(state);
    }

    fn arm_election_timer(&mut self) {
        let timeout = election_timeout(&self.config);
        self.election.as_mut().reset(Instant::now() + timeout);
        tracing::trace!(
            node_id = %self.node_id,
            timeout_ms = timeout.as_millis() as u64,
            "Election timer armed"
        );
    }

    pub(crate) fn become_leader(&mut self) {
        if self.role.is_leading() {
            return;
        }
        tracing::info!(node_id = %self.node_id, "No leader heard, taking over");
        let tenure = Tenure::begin(self);
        self.role = Role::Leading(tenure);
        self.publish(self.role.state());
    }

    /// Ends the current tenure, if any, and re-arms the election timer.
    pub(crate) fn abdicate(&mut self, reason: &'static str) {
        if let Some(tenure) = self.role.step_down() {
            tenure.abdicate();
            tracing::info!(
                node_id = %self.node_id,
                reason,
                tenure_ms = tenure.age().as_millis() as u64,
                "Abdicated"
            );
            self.publish(self.role.state());
        }
        // Re-armed on every entry to Pending, or a node that stepped down
        // without hearing a heartbeat would never lead again.
        self.arm_election_timer();
    }

    fn on_tenure_ended(&mut self, end: TenureEnd) {
        match end {
            TenureEnd::Abdicated => self.abdicate("tenure ended"),
            TenureEnd::Shutdown => {
                self.role.step_down();
            }
        }
    }

    fn terminate(&mut self) {
        if let Some(tenure) = self.role.step_down() {
            tenure.abdicate();
        }
        self.publish(ElectionState::Terminated);
        tracing::info!(node_id = %self.node_id, "Goodbye");
    }

    /// Runs the packet handling procedure for one datagram.
    ///
    /// Foreign datagrams and this node's own heartbeats and commands are
    /// dropped with `Ok(())`. Every returned error is non-fatal.
    pub(crate) async fn handle_packet(&mut self, packet: &Packet) -> Result<()> {
        let envelope = match Envelope::decode(&packet.payload) {
            Ok(envelope) => envelope,
            Err(_) => {
                tracing::trace!(
                    node_id = %self.node_id,
                    remote_addr = ?packet.remote_addr,
                    len = packet.payload.len(),
                    "Dropping foreign datagram"
                );
                return Ok(());
            }
        };

        if envelope.sender_id == self.node_id && envelope.kind != Kind::CommandResponse {
            return Ok(());
        }

        match envelope.kind {
            Kind::Command => self.handle_command(&envelope),
            Kind::CommandResponse => self.handle_command_response(envelope).await,
            Kind::Heartbeat => {
                self.handle_heartbeat(&envelope);
                Ok(())
            }
        }
    }

    fn handle_command(&mut self, envelope: &Envelope) -> Result<()> {
        // Someone already won an election and is giving orders.
        if self.role.is_leading() {
            tracing::info!(
                node_id = %self.node_id,
                rival = %envelope.sender_id,
                "Command from another leader"
            );
            self.abdicate("rival command");
        }

        let blob = envelope.command_blob()?;
        let handler = self
            .router
            .find_handler(&blob.name)
            .ok_or_else(|| DictatorError::NoHandler(blob.name.clone()))?;

        tracing::debug!(
            node_id = %self.node_id,
            command = %blob.name,
            commander = %envelope.sender_id,
            "Dispatching command"
        );
        handler.handle(self, envelope)
    }

    async fn handle_command_response(&mut self, envelope: Envelope) -> Result<()> {
        // SenderID names the addressee on responses.
        if envelope.sender_id != self.node_id {
            return Err(DictatorError::NotAddressed {
                addressee: envelope.sender_id,
            });
        }

        match &self.role {
            Role::Leading(tenure) => {
                tracing::debug!(node_id = %self.node_id, "Receive command response");
                tenure.deliver(envelope, &self.shutdown).await
            }
            Role::Pending => Err(DictatorError::NoActiveTenure),
        }
    }

    fn handle_heartbeat(&mut self, envelope: &Envelope) {
        if self.role.is_leading() {
            tracing::info!(
                node_id = %self.node_id,
                rival = %envelope.sender_id,
                "Heartbeat from another leader"
            );
            self.abdicate("rival heartbeat");
        } else {
            self.arm_election_timer();
        }
    }

    fn log_packet_error(&self, error: &DictatorError) {
        match error {
            DictatorError::NotAddressed { addressee } => {
                tracing::debug!(node_id = %self.node_id, addressee = %addressee, "Not my command response");
            }
            _ => {
                tracing::warn!(node_id = %self.node_id, error = %error, "Failed to handle packet");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn election_deadline(&self) -> Instant {
        self.election.deadline()
    }
}

/// A node running the election loop.
pub struct DictatorNode {
    ctx: NodeContext,
    inbound: mpsc::Receiver<Packet>,
}

impl DictatorNode {
    /// Creates a pending node with a freshly generated identity and an armed
    /// election timer. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`DictatorError::Config`] when `config` fails validation.
    pub fn new(
        config: ElectionConfig,
        shutdown: CancellationToken,
        inbound: mpsc::Receiver<Packet>,
        outbound: mpsc::Sender<Packet>,
        router: CommandRouter,
        mission: Arc<dyn Mission>,
    ) -> Result<Self> {
        config.validate()?;
        let ctx = NodeContext::new(
            NodeId::generate(),
            config,
            shutdown,
            outbound,
            Arc::new(router),
            mission,
        );
        Ok(Self { ctx, inbound })
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.ctx.node_id = node_id;
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.ctx.node_id
    }

    /// Watch the node move between pending, leading and terminated.
    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.ctx.state_tx.subscribe()
    }

    /// Runs the election loop until shutdown or until the inbound channel
    /// closes.
    pub async fn run(mut self) {
        tracing::info!(node_id = %self.ctx.node_id, "Node started, waiting for a leader");

        loop {
            let leading = self.ctx.role.is_leading();

            tokio::select! {
                biased;
                _ = self.ctx.shutdown.cancelled() => {
                    self.ctx.terminate();
                    return;
                }
                end = self.ctx.role.tenure_ended() => {
                    self.ctx.on_tenure_ended(end);
                }
                _ = self.ctx.election.as_mut(), if !leading => {
                    self.ctx.become_leader();
                }
                packet = self.inbound.recv() => match packet {
                    Some(packet) => {
                        if let Err(e) = self.ctx.handle_packet(&packet).await {
                            self.ctx.log_packet_error(&e);
                        }
                    }
                    None => {
                        tracing::warn!(node_id = %self.ctx.node_id, "Inbound channel closed, stopping node");
                        self.ctx.terminate();
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_context(node_id: NodeId) -> NodeContext {
    let (outbound, _) = mpsc::channel(1);
    let mission: Arc<dyn Mission> = Arc::new(|_tenure: crate::mission::TenureContext| {});
    NodeContext::new(
        node_id,
        ElectionConfig::default(),
        CancellationToken::new(),
        outbound,
        Arc::new(CommandRouter::new()),
        mission,
    )
}
