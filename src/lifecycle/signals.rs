//! OS signal handling.
//!
//! The first Ctrl-C triggers a graceful shutdown; a second one while
//! draining exits the process.

use crate::lifecycle::shutdown::Shutdown;

/// Resolve once the process receives Ctrl-C.
pub async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Spawn a task that turns Ctrl-C into `shutdown.trigger()`.
pub fn spawn_signal_handler(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Interrupt received, draining workers");
        shutdown.trigger();

        wait_for_signal().await;
        tracing::warn!("Second interrupt, exiting immediately");
        std::process::exit(130);
    })
}
