//! Background sweep of idle buckets.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::deadline_after;
use crate::registry::BucketRegistry;

/// Handle to a running evictor task.
///
/// Dropping the handle does not stop the task; call [`stop`](EvictorHandle::stop).
#[derive(Debug)]
pub struct EvictorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Spawns the evictor on the current tokio runtime.
///
/// The first sweep runs one `interval` after launch, then every `interval`.
pub fn spawn(registry: Arc<BucketRegistry>, interval: Duration) -> EvictorHandle {
    spawn_with_token(registry, interval, CancellationToken::new())
}

/// Like [`spawn`], stopping when `token` is cancelled.
pub fn spawn_with_token(
    registry: Arc<BucketRegistry>,
    interval: Duration,
    token: CancellationToken,
) -> EvictorHandle {
    let stop = token.clone();
    let task = tokio::spawn(async move {
        let start = deadline_after(tokio::time::Instant::now(), interval);
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            // Prefer the stop signal so no new sweep begins after stop was requested.
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.sweep();
                    tracing::debug!(removed, remaining = registry.len(), "evictor sweep finished");
                }
            }
        }
        tracing::debug!("evictor stopped");
    });
    EvictorHandle { token, task }
}

impl EvictorHandle {
    /// Requests the evictor to stop and waits until its task has exited.
    ///
    /// A sweep already in progress completes before this returns.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("evictor task failed: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
