//! OS signal handling.

use crate::lifecycle::Shutdown;

/// Wait for Ctrl-C, then trigger `shutdown`.
pub async fn wait_for_signal(shutdown: &Shutdown) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    shutdown.trigger();
    Ok(())
}
