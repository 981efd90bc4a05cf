//! OS signal handling.
//!
//! Resolves on SIGINT or SIGTERM so the binary can stop its subscribers
//! and exit cleanly.

use tokio::signal;

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    tracing::info!("Shutdown signal received");
    Ok(())
}
