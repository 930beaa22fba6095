//! Shutdown coordination for the gateway's long-running tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long `graceful_shutdown` waits for tasks before aborting them.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Owns the cancellation token every server task watches.
///
/// Cancelling is idempotent and one-way; a coordinator cannot be re-armed.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Fresh coordinator, not yet cancelled.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A token clone for a task to watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request shutdown and drain `handles`, aborting any task that is
    /// still running when the deadline passes.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        self.shutdown();
        let deadline = tokio::time::Instant::now() + timeout.unwrap_or(DRAIN_DEADLINE);
        info!(tasks = handles.len(), "draining server tasks");

        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("task missed the drain deadline, aborting");
                handle.abort();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
