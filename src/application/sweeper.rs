//! Background pruning of idle buckets.
//!
//! Buckets are created lazily and never destroyed by consumption alone, so a
//! long-running server accumulates one entry per actor it has ever seen. The
//! sweeper periodically drops buckets whose window and cooldown are over.

use crate::application::gate::RateLimitGate;
use crate::application::ports::BucketStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Error returned when sweeper configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SweeperConfigError {
    /// Sweep interval must be greater than zero
    #[error("sweep interval must be greater than 0")]
    ZeroInterval,
}

/// Error returned when the sweeper task did not stop cleanly.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The sweeper task panicked or was aborted
    #[error("sweeper task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Handle to a running sweeper.
///
/// Dropping the handle leaves the task running; call [`SweeperHandle::shutdown`]
/// to stop it.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to finish.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the task panicked.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        // Stores a permit if the task is mid-sweep
        self.shutdown.notify_one();
        self.task.await?;
        Ok(())
    }

    /// Whether the sweeper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task that calls [`RateLimitGate::prune_expired`] every `every`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
/// Returns `SweeperConfigError::ZeroInterval` if `every` is zero.
pub fn spawn_sweeper<S>(
    gate: RateLimitGate<S>,
    every: Duration,
) -> Result<SweeperHandle, SweeperConfigError>
where
    S: BucketStore + Clone + 'static,
{
    if every.is_zero() {
        return Err(SweeperConfigError::ZeroInterval);
    }

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    let task = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be idle yet
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = signal.notified() => break,
                _ = ticker.tick() => {
                    let pruned = gate.prune_expired();
                    if pruned > 0 {
                        tracing::debug!(pruned, remaining = ?gate.bucket_count(), "Pruned idle rate limit buckets");
                    }
                }
            }
        }
    });

    Ok(SweeperHandle { shutdown, task })
}
