use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::election::{DictatorNode, ElectionState};
use crate::error::Result;
use crate::mission::Mission;
use crate::protocol::NodeId;
use crate::router::CommandRouter;
use crate::transport::{bind_sockets, spawn_inbox, spawn_outbox};

/// A dictator node on a real network: UDP sockets, the inbox and outbox
/// pumps, and the election loop.
pub struct Node {
    config: NodeConfig,
    inbound: UdpSocket,
    outbound: UdpSocket,
    router: CommandRouter,
    mission: Arc<dyn Mission>,
    node_id: NodeId,
}

impl Node {
    /// Validates `config` and binds the sockets.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration or when either socket
    /// cannot be bound.
    pub async fn bind(
        config: NodeConfig,
        router: CommandRouter,
        mission: Arc<dyn Mission>,
    ) -> Result<Self> {
        config.validate()?;
        let (inbound, outbound) = bind_sockets(&config).await?;
        Ok(Self::from_sockets(config, inbound, outbound, router, mission))
    }

    /// Uses already bound sockets. `outbound` should be connected to the
    /// broadcast target.
    pub fn from_sockets(
        config: NodeConfig,
        inbound: UdpSocket,
        outbound: UdpSocket,
        router: CommandRouter,
        mission: Arc<dyn Mission>,
    ) -> Self {
        Self {
            config,
            inbound,
            outbound,
            router,
            mission,
            node_id: NodeId::generate(),
        }
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.inbound.local_addr()?)
    }

    /// Runs until `shutdown` is cancelled. Returns once the pumps have
    /// released their sockets.
    ///
    /// # Errors
    ///
    /// Returns a config error, without starting the election loop, when the
    /// election settings are invalid.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.run_with_state(shutdown, |_| {}).await
    }

    /// Like [`Node::run`], handing the election state receiver to `observe`
    /// before the loop starts.
    pub async fn run_with_state<F>(self, shutdown: CancellationToken, observe: F) -> Result<()>
    where
        F: FnOnce(watch::Receiver<ElectionState>),
    {
        let capacity = self.config.channel_capacity;
        let (inbound, inbox) = spawn_inbox(
            self.inbound,
            self.config.max_packet_size,
            capacity,
            shutdown.clone(),
        );
        let (outbound, outbox) = spawn_outbox(self.outbound, capacity, shutdown.clone());

        tracing::info!(
            node_id = %self.node_id,
            listen_addr = %self.config.listen_addr,
            broadcast_addr = %self.config.broadcast_addr,
            "Starting dictator node"
        );

        let result = match DictatorNode::new(
            self.config.election,
            shutdown.clone(),
            inbound,
            outbound,
            self.router,
            self.mission,
        ) {
            Ok(node) => {
                let node = node.with_node_id(self.node_id);
                observe(node.subscribe());
                node.run().await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(node_id = %self.node_id, error = %e, "Refusing to start election loop");
                Err(e)
            }
        };

        // The loop may also stop because the inbox died.
        shutdown.cancel();
        for (name, handle) in [("inbox", inbox), ("outbox", outbox)] {
            if let Err(e) = handle.await {
                tracing::error!(pump = name, error = %e, "UDP pump task failed");
            }
        }
        result
    }
}
