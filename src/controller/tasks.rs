//! Background task runner
//!
//! Periodic tasks decoupled from the reconcile call that spawned them.
//! Cancellation is cooperative: it is observed between ticks, never while a
//! tick is running.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `tick` every `period` until `cancel` fires. The first tick runs immediately.
pub fn spawn_periodic<F, Fut>(
    name: String,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(task = %name, period_ms = period.as_millis() as u64, "Starting periodic task");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => tick().await,
            }
        }

        debug!(task = %name, "Periodic task stopped");
    })
}
