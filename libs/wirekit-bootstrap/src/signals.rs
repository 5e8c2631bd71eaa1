use anyhow::Result;
use tokio::signal;

/// Resolve when the process receives Ctrl+C or, on unix, SIGTERM.
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("received Ctrl+C");
            }
            _ = term.recv() => {
                tracing::info!("received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        tracing::info!("received Ctrl+C");
    }

    tracing::info!("initiating graceful shutdown");
    Ok(())
}
