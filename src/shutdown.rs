use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is received.
/// The pumps and the election loop all watch this token.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let signals = signal(SignalKind::terminate())
            .and_then(|sigterm| Ok((sigterm, signal(SignalKind::interrupt())?)));

        match signals {
            Ok((mut sigterm, mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT, initiating graceful shutdown");
                    }
                    _ = token_clone.cancelled() => return,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::warn!(error = %e, "Ctrl-C handler failed");
                            return;
                        }
                        tracing::info!("Received Ctrl-C, initiating graceful shutdown");
                    }
                    _ = token_clone.cancelled() => return,
                }
            }
        }

        token_clone.cancel();
    });

    token
}
