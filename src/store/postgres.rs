use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::{NotificationStore, ReportStore};
use crate::models::notification::{
    NewNotification, Notification, OutcomeCounts, StuckNotification, SweepOutcome,
};
use crate::models::report::{NewReport, Report};
use crate::queue::partition_stuck;

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, text, sender_method, report_id, meta, status, retry_count, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Delete terminal notifications not touched since `older_than`.
    /// Housekeeping only; the queue itself never deletes rows.
    pub async fn purge_finished(&self, older_than: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM notifications
               WHERE status IN ('success', 'failed', 'error') AND updated_at < $1"#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_finished(&self, older_than: DateTime<Utc>) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM notifications
               WHERE status IN ('success', 'failed', 'error') AND updated_at < $1"#,
        )
        .bind(older_than)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn enqueue(&self, new: NewNotification) -> anyhow::Result<Notification> {
        let row = sqlx::query_as::<_, Notification>(&format!(
            r#"INSERT INTO notifications (user_id, text, sender_method, report_id, meta)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {NOTIFICATION_COLUMNS}"#
        ))
        .bind(new.user_id)
        .bind(&new.text)
        .bind(&new.sender_method)
        .bind(new.report_id)
        .bind(&new.meta)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn claim(&self, sender_method: &str, limit: i64) -> anyhow::Result<Vec<Notification>> {
        let mut tx = self.pool.begin().await?;

        // Rows locked by a concurrent claim are skipped rather than waited on,
        // so two callers never walk away with the same id.
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"SELECT id FROM notifications
               WHERE status = 'new' AND sender_method = $1
               ORDER BY created_at ASC, id ASC
               LIMIT $2
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(sender_method)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(vec![]);
        }

        let mut rows = sqlx::query_as::<_, Notification>(&format!(
            r#"UPDATE notifications
               SET status = 'in_progress', updated_at = NOW()
               WHERE id = ANY($1)
               RETURNING {NOTIFICATION_COLUMNS}"#
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        // RETURNING order is unspecified.
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn report_texts(&self, report_ids: &[i64]) -> anyhow::Result<HashMap<i64, String>> {
        if report_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, result FROM reports WHERE id = ANY($1)",
        )
        .bind(report_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn mark_outcome(
        &self,
        success_ids: &[i64],
        failed_ids: &[i64],
    ) -> anyhow::Result<OutcomeCounts> {
        let mut tx = self.pool.begin().await?;
        let mut counts = OutcomeCounts::default();

        if !success_ids.is_empty() {
            counts.success_count = sqlx::query(
                r#"UPDATE notifications
                   SET status = 'success', updated_at = NOW()
                   WHERE id = ANY($1) AND status = 'in_progress'"#,
            )
            .bind(success_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        if !failed_ids.is_empty() {
            counts.failed_count = sqlx::query(
                r#"UPDATE notifications
                   SET status = 'failed', updated_at = NOW()
                   WHERE id = ANY($1) AND status = 'in_progress'"#,
            )
            .bind(failed_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(counts)
    }

    async fn recover_stuck(
        &self,
        older_than: DateTime<Utc>,
        max_retry_count: i32,
    ) -> anyhow::Result<SweepOutcome> {
        let mut tx = self.pool.begin().await?;

        // Locking the stale rows keeps a late worker report from racing the
        // requeue; rows a worker is updating right now are left for next time.
        let stuck = sqlx::query_as::<_, StuckNotification>(
            r#"SELECT id, retry_count FROM notifications
               WHERE status = 'in_progress' AND updated_at < $1
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(older_than)
        .fetch_all(&mut *tx)
        .await?;

        if stuck.is_empty() {
            tx.rollback().await?;
            return Ok(SweepOutcome::default());
        }

        let outcome = partition_stuck(&stuck, max_retry_count);

        if !outcome.requeued.is_empty() {
            sqlx::query(
                r#"UPDATE notifications
                   SET status = 'new', retry_count = retry_count + 1, updated_at = NOW()
                   WHERE id = ANY($1)"#,
            )
            .bind(&outcome.requeued)
            .execute(&mut *tx)
            .await?;
        }

        if !outcome.errored.is_empty() {
            sqlx::query(
                r#"UPDATE notifications
                   SET status = 'error', updated_at = NOW()
                   WHERE id = ANY($1)"#,
            )
            .bind(&outcome.errored)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn list_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(&format!(
            r#"SELECT {NOTIFICATION_COLUMNS} FROM notifications
               WHERE user_id = $1
               ORDER BY created_at ASC, id ASC"#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn create_report(
        &self,
        report: NewReport,
        sender_method: Option<&str>,
    ) -> anyhow::Result<(Report, Option<Notification>)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Report>(
            r#"INSERT INTO reports (user_id, report_type, result)
               VALUES ($1, $2, $3)
               RETURNING id, user_id, report_type, result, created_at, updated_at"#,
        )
        .bind(report.user_id)
        .bind(&report.report_type)
        .bind(&report.result)
        .fetch_one(&mut *tx)
        .await?;

        let notification = match sender_method {
            Some(method) => Some(
                sqlx::query_as::<_, Notification>(&format!(
                    r#"INSERT INTO notifications (user_id, text, sender_method, report_id, meta)
                       VALUES ($1, NULL, $2, $3, $4)
                       RETURNING {NOTIFICATION_COLUMNS}"#
                ))
                .bind(row.user_id)
                .bind(method)
                .bind(row.id)
                .bind(serde_json::json!({ "report_type": row.report_type }))
                .fetch_one(&mut *tx)
                .await?,
            ),
            None => None,
        };

        tx.commit().await?;
        Ok((row, notification))
    }

    async fn list_reports_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Report>> {
        let rows = sqlx::query_as::<_, Report>(
            r#"SELECT id, user_id, report_type, result, created_at, updated_at
               FROM reports
               WHERE user_id = $1
               ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
