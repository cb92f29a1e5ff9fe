//! Cluster bootstrap: the leader hands out an address assignment until some
//! node acknowledges it, then tells the whole cluster to reboot.
//!
//! Commands:
//! - `AssignIP` (value: optional address string) answered with status
//!   [`STATUS_OK`] by every receiving node
//! - `Reboot` (no value) stops the receiving node
//!
//! Acquiring the address itself is outside this crate; the leader only
//! forwards what the operator configured.

use std::time::Duration;

use crate::election::NodeContext;
use crate::error::Result;
use crate::mission::{Mission, TenureContext};
use crate::protocol::{new_command_packet, new_command_response_packet, Envelope};
use crate::router::CommandRouter;

pub const ASSIGN_IP: &str = "AssignIP";
pub const REBOOT: &str = "Reboot";
pub const STATUS_OK: i32 = 1;

#[derive(Debug, Clone)]
pub struct BootstrapMission {
    address: Option<String>,
    resend_interval: Duration,
    reboot_grace: Duration,
}

impl BootstrapMission {
    pub fn new(address: Option<String>) -> Self {
        Self {
            address,
            resend_interval: Duration::from_secs(1),
            reboot_grace: Duration::from_secs(1),
        }
    }

    /// How often `AssignIP` is re-broadcast while no node has answered.
    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    /// Delay between broadcasting `Reboot` and stopping the leader itself.
    pub fn with_reboot_grace(mut self, grace: Duration) -> Self {
        self.reboot_grace = grace;
        self
    }
}

impl Mission for BootstrapMission {
    fn launch(&self, tenure: TenureContext) {
        tokio::spawn(run_bootstrap(tenure, self.clone()));
    }
}

async fn run_bootstrap(mut tenure: TenureContext, mission: BootstrapMission) {
    let node_id = tenure.node_id().clone();
    tracing::info!(node_id = %node_id, address = ?mission.address, "Start to build new cluster");

    let assign = match new_command_packet(&node_id, ASSIGN_IP, &mission.address) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::error!(node_id = %node_id, error = %e, "Failed to build AssignIP command");
            return;
        }
    };

    let mut resend = tokio::time::interval(mission.resend_interval);
    let responder = loop {
        tokio::select! {
            response = tenure.next_response() => {
                let Some(envelope) = response else {
                    tracing::debug!(node_id = %node_id, "Tenure over before AssignIP was acknowledged");
                    return;
                };
                match envelope.response_blob() {
                    Ok(blob) if blob.status == STATUS_OK => break blob.responder_id,
                    Ok(blob) => {
                        tracing::warn!(
                            node_id = %node_id,
                            responder_id = %blob.responder_id,
                            status = blob.status,
                            "AssignIP rejected"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(node_id = %node_id, error = %e, "Malformed command response");
                    }
                }
            }
            _ = resend.tick() => {
                if tenure.send(assign.clone()).await.is_err() {
                    return;
                }
                tracing::debug!(node_id = %node_id, "AssignIP broadcast");
            }
        }
    };

    tracing::info!(
        node_id = %node_id,
        responder_id = %responder,
        "Command successfully done, send reboot command"
    );
    if let Err(e) = tenure.send_command(REBOOT, ()).await {
        tracing::warn!(node_id = %node_id, error = %e, "Failed to broadcast Reboot");
        return;
    }

    tokio::select! {
        _ = tenure.shutdown_token().cancelled() => {}
        _ = tokio::time::sleep(mission.reboot_grace) => {
            tracing::info!(node_id = %node_id, "Cluster rebooting, shutting down leader");
            tenure.shutdown_token().cancel();
        }
    }
}

/// Answers `AssignIP` with a success response addressed to the commander.
pub fn assign_ip_handler(ctx: &NodeContext, envelope: &Envelope) -> Result<()> {
    let blob = envelope.command_blob()?;
    let address: Option<String> = blob.value_as().unwrap_or(None);
    tracing::info!(
        node_id = %ctx.node_id(),
        commander = %envelope.sender_id,
        address = ?address,
        "Receive command AssignIP"
    );

    let response = new_command_response_packet(&envelope.sender_id, ctx.node_id(), STATUS_OK, ())?;
    ctx.send(response)
}

/// Stops the node. Restarting the machine is up to the process supervisor.
pub fn reboot_handler(ctx: &NodeContext, envelope: &Envelope) -> Result<()> {
    tracing::info!(
        node_id = %ctx.node_id(),
        commander = %envelope.sender_id,
        "Receive command Reboot"
    );
    ctx.shutdown_token().cancel();
    Ok(())
}

pub fn bootstrap_router() -> CommandRouter {
    let mut router = CommandRouter::new();
    router.add_handler(ASSIGN_IP, assign_ip_handler);
    router.add_handler(REBOOT, reboot_handler);
    router
}
