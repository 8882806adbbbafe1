//! In-process store for tests and local development.
//!
//! A single `tokio::sync::Mutex` serializes every operation, which gives the
//! same claim semantics as the Postgres backend inside one process. It offers
//! no exclusion between processes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NotificationStore, ReportStore};
use crate::models::notification::{
    NewNotification, Notification, NotificationStatus, OutcomeCounts, StuckNotification,
    SweepOutcome,
};
use crate::models::report::{NewReport, Report};
use crate::queue::partition_stuck;

#[derive(Default)]
struct Tables {
    notifications: Vec<Notification>,
    reports: Vec<Report>,
    next_notification_id: i64,
    next_report_id: i64,
}

impl Tables {
    fn insert_notification(&mut self, new: NewNotification) -> Notification {
        self.next_notification_id += 1;
        let now = Utc::now();
        let row = Notification {
            id: self.next_notification_id,
            user_id: new.user_id,
            text: new.text,
            sender_method: new.sender_method,
            report_id: new.report_id,
            meta: new.meta,
            status: NotificationStatus::New,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.notifications.push(row.clone());
        row
    }

    /// Apply `from → to` to every listed id currently in `from`.
    fn transition(
        &mut self,
        ids: &[i64],
        from: NotificationStatus,
        to: NotificationStatus,
        now: DateTime<Utc>,
    ) -> u64 {
        debug_assert!(from.can_transition_to(to));
        let mut affected = 0;
        for n in self.notifications.iter_mut() {
            if n.status == from && ids.contains(&n.id) {
                n.status = to;
                n.updated_at = now;
                affected += 1;
            }
        }
        affected
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stored row, exactly as persisted.
    pub async fn get(&self, id: i64) -> Option<Notification> {
        let tables = self.tables.lock().await;
        tables.notifications.iter().find(|n| n.id == id).cloned()
    }

    /// Rewrite `updated_at` on a row. Lets tests age a claim without waiting.
    pub async fn set_updated_at(&self, id: i64, updated_at: DateTime<Utc>) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.updated_at = updated_at;
                true
            }
            None => false,
        }
    }

    /// Overwrite status and retry counter on a row.
    pub async fn force_state(&self, id: i64, status: NotificationStatus, retry_count: i32) -> bool {
        let mut tables = self.tables.lock().await;
        match tables.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.status = status;
                n.retry_count = retry_count;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn enqueue(&self, new: NewNotification) -> anyhow::Result<Notification> {
        let mut tables = self.tables.lock().await;
        Ok(tables.insert_notification(new))
    }

    async fn claim(&self, sender_method: &str, limit: i64) -> anyhow::Result<Vec<Notification>> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let limit = usize::try_from(limit).unwrap_or(0);

        let mut candidates: Vec<usize> = tables
            .notifications
            .iter()
            .enumerate()
            .filter(|(_, n)| n.status == NotificationStatus::New && n.sender_method == sender_method)
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by(|&a, &b| {
            let (a, b) = (&tables.notifications[a], &tables.notifications[b]);
            a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
        });
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for i in candidates {
            let n = &mut tables.notifications[i];
            n.status = NotificationStatus::InProgress;
            n.updated_at = now;
            claimed.push(n.clone());
        }
        Ok(claimed)
    }

    async fn report_texts(&self, report_ids: &[i64]) -> anyhow::Result<HashMap<i64, String>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .reports
            .iter()
            .filter(|r| report_ids.contains(&r.id))
            .map(|r| (r.id, r.result.clone()))
            .collect())
    }

    async fn mark_outcome(
        &self,
        success_ids: &[i64],
        failed_ids: &[i64],
    ) -> anyhow::Result<OutcomeCounts> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        Ok(OutcomeCounts {
            success_count: tables.transition(
                success_ids,
                NotificationStatus::InProgress,
                NotificationStatus::Success,
                now,
            ),
            failed_count: tables.transition(
                failed_ids,
                NotificationStatus::InProgress,
                NotificationStatus::Failed,
                now,
            ),
        })
    }

    async fn recover_stuck(
        &self,
        older_than: DateTime<Utc>,
        max_retry_count: i32,
    ) -> anyhow::Result<SweepOutcome> {
        let mut tables = self.tables.lock().await;
        let stuck: Vec<StuckNotification> = tables
            .notifications
            .iter()
            .filter(|n| n.status == NotificationStatus::InProgress && n.updated_at < older_than)
            .map(|n| StuckNotification {
                id: n.id,
                retry_count: n.retry_count,
            })
            .collect();

        if stuck.is_empty() {
            return Ok(SweepOutcome::default());
        }

        let outcome = partition_stuck(&stuck, max_retry_count);
        let now = Utc::now();
        for n in tables.notifications.iter_mut() {
            if outcome.requeued.contains(&n.id) {
                n.status = NotificationStatus::New;
                n.retry_count += 1;
                n.updated_at = now;
            } else if outcome.errored.contains(&n.id) {
                n.status = NotificationStatus::Error;
                n.updated_at = now;
            }
        }
        Ok(outcome)
    }

    async fn list_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Notification>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn create_report(
        &self,
        report: NewReport,
        sender_method: Option<&str>,
    ) -> anyhow::Result<(Report, Option<Notification>)> {
        let mut tables = self.tables.lock().await;
        tables.next_report_id += 1;
        let now = Utc::now();
        let row = Report {
            id: tables.next_report_id,
            user_id: report.user_id,
            report_type: report.report_type,
            result: report.result,
            created_at: now,
            updated_at: now,
        };
        tables.reports.push(row.clone());

        let notification = sender_method.map(|method| {
            tables.insert_notification(NewNotification {
                user_id: row.user_id,
                sender_method: method.to_string(),
                text: None,
                report_id: Some(row.id),
                meta: serde_json::json!({ "report_type": row.report_type }),
            })
        });
        Ok((row, notification))
    }

    async fn list_reports_for_user(&self, user_id: Uuid) -> anyhow::Result<Vec<Report>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Report> = tables
            .reports
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.reverse();
        Ok(rows)
    }
}
