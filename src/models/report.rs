use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A finished report. Generation happens upstream; only the text lands here.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Report {
    pub id: i64,
    pub user_id: Uuid,
    pub report_type: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReport {
    pub user_id: Uuid,
    pub report_type: String,
    pub result: String,
}

pub const REPORT_TYPES: [&str; 3] = ["day", "week", "month"];

pub fn is_valid_report_type(report_type: &str) -> bool {
    REPORT_TYPES.contains(&report_type)
}
