//! Notification dispatch queue.
//!
//! Sender workers `reserve` batches for one sender method, deliver them, and
//! report the outcome. Claims that are never reported go stale and are picked
//! up by the recovery sweep (see `jobs::recovery`), which requeues them until
//! `max_retry_count` is exhausted and then parks them in `error`.

pub mod metrics;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::models::notification::{
    NewNotification, Notification, OutcomeCounts, StuckNotification, SweepOutcome,
};
use crate::store::NotificationStore;

pub const MIN_RESERVE_LIMIT: i64 = 1;
pub const MAX_RESERVE_LIMIT: i64 = 100;
pub const DEFAULT_RESERVE_LIMIT: i64 = MAX_RESERVE_LIMIT;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a claim may sit in `in_progress` before the sweep reclaims it.
    pub stuck_timeout: Duration,
    /// Reclaims allowed before a stuck item is moved to `error`.
    pub max_retry_count: i32,
    /// Period of the recovery sweep.
    pub sweep_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stuck_timeout: Duration::from_secs(5 * 60),
            max_retry_count: 2,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Clamp a caller-supplied batch size into `[1, 100]`.
pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(MIN_RESERVE_LIMIT, MAX_RESERVE_LIMIT)
}

/// Split stale claims into those to requeue (`retry_count < max`) and those
/// that have used up their retries.
pub fn partition_stuck(stuck: &[StuckNotification], max_retry_count: i32) -> SweepOutcome {
    let (requeued, errored): (Vec<StuckNotification>, Vec<StuckNotification>) = stuck
        .iter()
        .copied()
        .partition(|s| s.retry_count < max_retry_count);
    SweepOutcome {
        requeued: requeued.into_iter().map(|s| s.id).collect(),
        errored: errored.into_iter().map(|s| s.id).collect(),
    }
}

/// Report ids referenced by a batch, deduplicated.
pub fn linked_report_ids(batch: &[Notification]) -> Vec<i64> {
    let mut ids: Vec<i64> = batch.iter().filter_map(|n| n.report_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Replace `text` with the linked report's result on the outgoing view.
/// Rows whose report is missing keep their stored text.
pub fn substitute_report_texts(batch: &mut [Notification], texts: &HashMap<i64, String>) {
    for n in batch.iter_mut() {
        if let Some(text) = n.report_id.and_then(|id| texts.get(&id)) {
            n.text = Some(text.clone());
        }
    }
}

#[derive(Clone)]
pub struct NotificationQueue {
    store: Arc<dyn NotificationStore>,
    config: QueueConfig,
}

impl NotificationQueue {
    pub fn new(store: Arc<dyn NotificationStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub async fn enqueue(&self, new: NewNotification) -> anyhow::Result<Notification> {
        let row = self.store.enqueue(new).await?;
        tracing::debug!(id = row.id, sender_method = %row.sender_method, "notification enqueued");
        Ok(row)
    }

    /// Claim up to `limit` (clamped) of the oldest `new` notifications for
    /// `sender_method`. An empty batch is a normal result.
    pub async fn reserve(
        &self,
        sender_method: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let limit = clamp_limit(limit);
        let mut batch = self.store.claim(sender_method, limit).await?;

        if batch.is_empty() {
            tracing::info!(sender_method, "no new notifications to reserve");
            return Ok(batch);
        }

        let report_ids = linked_report_ids(&batch);
        if !report_ids.is_empty() {
            let texts = self.store.report_texts(&report_ids).await?;
            substitute_report_texts(&mut batch, &texts);
        }

        metrics::record_reserved(sender_method, batch.len());
        tracing::info!(sender_method, count = batch.len(), "reserved notifications");
        Ok(batch)
    }

    /// Record delivery results for a claimed batch. Ids not in `in_progress`
    /// are skipped and simply not counted.
    pub async fn report_outcome(
        &self,
        success_ids: &[i64],
        failed_ids: &[i64],
    ) -> anyhow::Result<OutcomeCounts> {
        if success_ids.is_empty() && failed_ids.is_empty() {
            return Ok(OutcomeCounts::default());
        }

        let counts = self.store.mark_outcome(success_ids, failed_ids).await?;
        metrics::record_outcome(&counts);
        tracing::info!(
            success = counts.success_count,
            failed = counts.failed_count,
            "marked notification outcomes"
        );
        Ok(counts)
    }

    /// One recovery pass over claims older than the configured timeout.
    pub async fn sweep(&self) -> anyhow::Result<SweepOutcome> {
        let timeout = chrono::Duration::from_std(self.config.stuck_timeout)?;
        let threshold = Utc::now()
            .checked_sub_signed(timeout)
            .ok_or_else(|| anyhow::anyhow!("stuck timeout {:?} is out of range", self.config.stuck_timeout))?;

        let outcome = self
            .store
            .recover_stuck(threshold, self.config.max_retry_count)
            .await?;

        if outcome.is_empty() {
            tracing::debug!("no stuck notifications found");
        } else {
            metrics::record_sweep(&outcome);
            tracing::info!(
                retried = outcome.requeued.len(),
                errored = outcome.errored.len(),
                "processed {} stuck notifications",
                outcome.total()
            );
        }
        Ok(outcome)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Notification>> {
        let rows = self.store.list_for_user(user_id).await?;
        tracing::info!(%user_id, count = rows.len(), "retrieved notifications for user");
        Ok(rows)
    }
}
