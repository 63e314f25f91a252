//! Signal handling for cooperative cancellation.

use atags_indexer::Cancellation;

/// Cancel `cancel` on the first Ctrl+C or SIGTERM.
pub async fn cancel_on_shutdown(cancel: Cancellation) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            tracing::info!("Received SIGINT, finishing in-flight files");
        }
        _ = wait_for_sigterm() => {
            tracing::info!("Received SIGTERM, finishing in-flight files");
        }
    }

    cancel.cancel();
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
