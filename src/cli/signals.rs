//! Signal handling for graceful shutdown

use crate::workflow::CancellationToken;
use std::io;

/// Wait for SIGINT or SIGTERM (Ctrl+C elsewhere) and cancel `token`.
///
/// Fails only when the handlers cannot be installed.
pub async fn cancel_on_signal(token: CancellationToken) -> io::Result<()> {
    let signal = wait_for_signal().await?;
    eprintln!("\nReceived {signal}, cancelling (in-flight nodes get a grace period)...");
    tracing::info!(signal, "Shutdown requested");
    token.cancel();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

/// Spawn the signal listener for the lifetime of a run
pub fn install(token: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        if let Err(e) = cancel_on_signal(token).await {
            tracing::warn!(error = %e, "Failed to install signal handlers");
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_leaves_token_alone_without_signal() {
        let token = CancellationToken::new();
        let handle = install(&token);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!token.is_cancelled());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
