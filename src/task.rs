//! Recurring background task handle.
//!
//! Cache sweeps, metrics flushes, and runtime cleanup all run as independent
//! scheduled tasks: started explicitly, cancellable, and owned by the
//! component that needs them. A tick never propagates a fault upward; the
//! tick body is expected to log its own failures.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a spawned ticking loop.
///
/// The loop is aborted on [`cancel`](ScheduledTask::cancel) or when the
/// handle is dropped, so a task can never outlive its owner.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn a loop that runs `tick` every `period`.
    ///
    /// The first tick fires one full period after spawning, not immediately.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick completes immediately; skip it.
            interval.tick().await;

            loop {
                interval.tick().await;
                tick().await;
            }
        });

        debug!("Scheduled task '{}' started (period {:?})", name, period);

        Self { name, handle }
    }

    /// Stop the loop. Idempotent.
    pub fn cancel(&self) {
        self.handle.abort();
        debug!("Scheduled task '{}' cancelled", self.name);
    }

    /// Stop the loop and wait for the spawned task to finish unwinding.
    ///
    /// Unlike [`cancel`](ScheduledTask::cancel), when this returns the tick
    /// future has been dropped, so any cleanup its drop guards perform has
    /// already happened.
    pub async fn stop(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
        debug!("Scheduled task '{}' stopped", self.name);
    }

    /// Name this task was spawned with.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
