//! Relay shutdown: one root token plus the named tasks it stops.
//!
//! Long-running pieces (HTTP listener, hub, sweeper, archive writer) are
//! registered with [`ShutdownCoordinator::track`]. [`ShutdownCoordinator::drain`]
//! cancels the token and waits for them in registration order under a single
//! deadline; whatever is still running at the deadline is aborted.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default drain deadline.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

struct TrackedTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Root cancellation token and the relay tasks waiting on it.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<TrackedTask>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with the default drain deadline.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Coordinator whose [`drain`](Self::drain) gives up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// Clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the root token without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register a task to wait for on [`drain`](Self::drain).
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        debug!(task = name, "tracking task");
        self.tasks.lock().push(TrackedTask { name, handle });
    }

    /// Number of tasks registered and not yet drained.
    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cancel the token, then wait for every tracked task. Returns the names
    /// of tasks that missed the deadline and were aborted.
    pub async fn drain(&self) -> Vec<&'static str> {
        self.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(tasks = tasks.len(), timeout_secs = self.timeout.as_secs(), "draining relay tasks");

        let deadline = Instant::now() + self.timeout;
        let mut stuck = Vec::new();
        for TrackedTask { name, mut handle } in tasks {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "task missed the shutdown deadline, aborting");
                    handle.abort();
                    stuck.push(name);
                }
            }
        }
        stuck
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("cancelled", &self.is_shutting_down())
            .field("tracked", &self.tracked())
            .field("timeout", &self.timeout)
            .finish()
    }
}
