pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::notification::{NewNotification, Notification, OutcomeCounts, SweepOutcome};
use crate::models::report::{NewReport, Report};

/// Persistence for the notification queue.
/// Implementations: PgStore (row locks in Postgres), MemoryStore (single process).
///
/// Every mutating method is one atomic unit; callers never hold locks across calls.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a `new` notification.
    async fn enqueue(&self, new: NewNotification) -> anyhow::Result<Notification>;

    /// Move up to `limit` of the oldest `new` rows for `sender_method` to
    /// `in_progress` and return them, oldest first. Rows already claimed by a
    /// concurrent caller are skipped, never shared.
    async fn claim(&self, sender_method: &str, limit: i64) -> anyhow::Result<Vec<Notification>>;

    /// Batched lookup of report results by id. Unknown ids are absent from the map.
    async fn report_texts(&self, report_ids: &[i64]) -> anyhow::Result<HashMap<i64, String>>;

    /// `in_progress → success` for `success_ids`, `in_progress → failed` for
    /// `failed_ids`. Ids in any other state are not counted.
    async fn mark_outcome(
        &self,
        success_ids: &[i64],
        failed_ids: &[i64],
    ) -> anyhow::Result<OutcomeCounts>;

    /// Requeue or fail every `in_progress` row last touched before `older_than`.
    async fn recover_stuck(
        &self,
        older_than: DateTime<Utc>,
        max_retry_count: i32,
    ) -> anyhow::Result<SweepOutcome>;

    /// All notifications for a user in any state, oldest first.
    async fn list_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Notification>>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Store a report and, when `sender_method` is given, enqueue a
    /// notification pointing at it. Both rows are written together or not at all.
    async fn create_report(
        &self,
        report: NewReport,
        sender_method: Option<&str>,
    ) -> anyhow::Result<(Report, Option<Notification>)>;

    async fn list_reports_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Report>>;
}

/// Backend used by the server: both halves of the data layer.
pub trait Store: NotificationStore + ReportStore {}

impl<T: NotificationStore + ReportStore> Store for T {}
