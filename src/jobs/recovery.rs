//! Background job: reclaim stuck notifications.
//!
//! Every `sweep_interval` (60s by default) requeues `in_progress` rows whose
//! claim went stale, or moves them to `error` once their retries are used up.
//! A failed pass is logged and the loop carries on with the next tick.

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::queue::{metrics, NotificationQueue};

/// Spawn the recovery loop. Call this once at startup; cancel `shutdown` to stop it.
pub fn spawn(queue: NotificationQueue, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = queue.config().sweep_interval;
        tracing::info!(
            interval_secs = period.as_secs(),
            timeout_secs = queue.config().stuck_timeout.as_secs(),
            max_retry_count = queue.config().max_retry_count,
            "notification recovery job started"
        );

        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => run_once(&queue).await,
            }
        }

        tracing::info!("notification recovery job stopped");
    })
}

/// One sweep with its own error boundary. Never returns an error.
pub async fn run_once(queue: &NotificationQueue) {
    if let Err(e) = queue.sweep().await {
        metrics::record_sweep_failure();
        tracing::error!("notification recovery sweep failed: {:#}", e);
    }
}
