use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of outbound delivery work.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub user_id: Uuid,
    /// Literal body. When `report_id` is set, the body delivered to senders
    /// is resolved from the linked report instead.
    pub text: Option<String>,
    pub sender_method: String,
    pub report_id: Option<i64>,
    pub meta: serde_json::Value,
    pub status: NotificationStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for enqueueing a notification. New rows always start as `new`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub sender_method: String,
    pub text: Option<String>,
    #[serde(default)]
    pub report_id: Option<i64>,
    #[serde(default = "empty_meta")]
    pub meta: serde_json::Value,
}

pub fn empty_meta() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationStatus {
    New,
    InProgress,
    Success,
    Failed,
    Error,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::New => "new",
            NotificationStatus::InProgress => "in_progress",
            NotificationStatus::Success => "success",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Error => "error",
        }
    }

    /// `success`, `failed` and `error` are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Success | NotificationStatus::Failed | NotificationStatus::Error
        )
    }

    /// Legal edges of the notification lifecycle.
    ///
    /// `new → in_progress` is a claim, `in_progress → success|failed` is a
    /// worker-reported outcome, and `in_progress → new|error` is the recovery
    /// sweep requeueing or giving up on a stuck item.
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (*self, next),
            (New, InProgress)
                | (InProgress, Success)
                | (InProgress, Failed)
                | (InProgress, New)
                | (InProgress, Error)
        )
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// `(id, retry_count)` of an `in_progress` row whose claim went stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct StuckNotification {
    pub id: i64,
    pub retry_count: i32,
}

/// Rows affected by one outcome report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub success_count: u64,
    pub failed_count: u64,
}

/// Result of one recovery sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub requeued: Vec<i64>,
    pub errored: Vec<i64>,
}

impl SweepOutcome {
    pub fn total(&self) -> usize {
        self.requeued.len() + self.errored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
