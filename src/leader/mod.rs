//! Leader behavior for the duration of one tenure.
//!
//! Entering the leading role:
//! 1. draws a heartbeat period from the configured window
//! 2. launches the mission exactly once with a fresh [`TenureContext`]
//! 3. spawns the [`HeartbeatSender`] loop
//!
//! The tenure ends when its abdication token is cancelled (by the election
//! loop on a rival signal, or by the mission itself) or on shutdown. The
//! abdication token is a child of the shutdown token, so cancelling is
//! non-blocking and works even if nobody listens anymore.

pub mod heartbeat;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::election::timer::heartbeat_interval;
use crate::election::NodeContext;
use crate::error::{DictatorError, Result};
use crate::mission::TenureContext;
use crate::protocol::Envelope;

pub use heartbeat::{HeartbeatSender, TenureEnd};

#[derive(Debug)]
pub(crate) struct Tenure {
    abdication: CancellationToken,
    responses: mpsc::Sender<Envelope>,
    heartbeat: JoinHandle<TenureEnd>,
    started_at: Instant,
}

impl Tenure {
    pub(crate) fn begin(ctx: &NodeContext) -> Self {
        let period = heartbeat_interval(&ctx.config);
        let abdication = ctx.shutdown.child_token();
        let (responses, responses_rx) = mpsc::channel(ctx.config.response_buffer);

        ctx.mission.launch(TenureContext::new(
            ctx.node_id.clone(),
            ctx.outbound.clone(),
            ctx.shutdown.clone(),
            abdication.clone(),
            responses_rx,
        ));

        let sender = HeartbeatSender::new(ctx.node_id.clone(), period);
        tracing::debug!(
            node_id = %ctx.node_id,
            period_ms = period.as_millis() as u64,
            "Heartbeat started"
        );
        let heartbeat = tokio::spawn(sender.run(
            ctx.outbound.clone(),
            ctx.shutdown.clone(),
            abdication.clone(),
        ));

        Self {
            abdication,
            responses,
            heartbeat,
            started_at: Instant::now(),
        }
    }

    /// Signals the heartbeat loop and the mission to stop. Idempotent.
    pub(crate) fn abdicate(&self) {
        self.abdication.cancel();
    }

    pub(crate) fn age(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub(crate) async fn ended(&mut self) -> TenureEnd {
        match (&mut self.heartbeat).await {
            Ok(end) => end,
            Err(e) => {
                tracing::warn!(error = %e, "Heartbeat task failed");
                TenureEnd::Abdicated
            }
        }
    }

    /// Hands a response to the mission. Blocks while the mission's buffer is
    /// full, until the tenure ends.
    pub(crate) async fn deliver(
        &self,
        envelope: Envelope,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Ok(()),
            _ = self.abdication.cancelled() => Err(DictatorError::NoActiveTenure),
            sent = self.responses.send(envelope) => sent.map_err(|_| DictatorError::ChannelClosed),
        }
    }
}
