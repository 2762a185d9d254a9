//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! On a signal the cancellation token fires: work not yet begun stays
//! unstarted and retry rounds stop, but already-running rsync invocations
//! are left to reach their own completion or timeout.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// Token handed to the orchestrator and monitor.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the background task that cancels the token on SIGINT/SIGTERM.
    pub fn spawn_signal_listener(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Stopping gracefully: running transfers will finish, no new work starts");
            cancel.cancel();
        });
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
