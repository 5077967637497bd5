//! Process signal handling shared by the service binaries.

use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Resolves once SIGTERM or SIGINT arrives, logging which one it was.
///
/// Both service binaries block on this before starting their orderly
/// teardown sequence.
pub async fn wait_for_shutdown() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = received, "shutdown signal received, draining");
}
