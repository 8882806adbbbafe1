use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::notification::{empty_meta, NewNotification, Notification, OutcomeCounts};
use crate::models::report::{is_valid_report_type, NewReport, Report, REPORT_TYPES};
use crate::queue::{metrics::encode_metrics, DEFAULT_RESERVE_LIMIT};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct ReserveRequest {
    pub sender_method: String,
    /// Clamped to 1..=100; out-of-range values are corrected, not rejected.
    pub limit: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct OutcomeRequest {
    #[serde(default)]
    pub notification_ids: Vec<i64>,
    #[serde(default)]
    pub failed_ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub user_id: Uuid,
    pub sender_method: String,
    pub text: Option<String>,
    pub meta: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct CreateReportRequest {
    pub user_id: Uuid,
    pub report_type: String,
    pub result: String,
    /// Channel to notify once the report is stored. No notification when absent.
    pub sender_method: Option<String>,
}

#[derive(Serialize)]
pub struct CreateReportResponse {
    pub report: Report,
    pub notification: Option<Notification>,
}

fn require_sender_method(sender_method: &str) -> Result<&str, AppError> {
    let trimmed = sender_method.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("sender_method must not be empty".into()));
    }
    Ok(trimmed)
}

// ── Health ───────────────────────────────────────────────────

/// GET /: liveness
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "reportq is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "reportq" }))
}

/// GET /metrics: Prometheus text exposition
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}

// ── Notifications ────────────────────────────────────────────

/// POST /notifications: enqueue a literal-text notification
pub async fn enqueue_notification(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<Notification>), AppError> {
    let sender_method = require_sender_method(&payload.sender_method)?.to_string();
    let meta = payload.meta.unwrap_or_else(empty_meta);
    if !meta.is_object() {
        return Err(AppError::Validation("meta must be a JSON object".into()));
    }

    let row = state
        .queue
        .enqueue(NewNotification {
            user_id: payload.user_id,
            sender_method,
            text: payload.text,
            report_id: None,
            meta,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(row)))
}

/// POST /notifications/reserve: claim a batch for one sender method
pub async fn reserve_notifications(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ReserveRequest>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let sender_method = require_sender_method(&payload.sender_method)?;
    let limit = payload.limit.unwrap_or(DEFAULT_RESERVE_LIMIT);

    let batch = state.queue.reserve(sender_method, limit).await?;
    Ok(Json(batch))
}

/// POST /notifications/success: report delivery outcomes for a claimed batch
pub async fn report_outcome(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OutcomeRequest>,
) -> Result<Json<OutcomeCounts>, AppError> {
    let counts = state
        .queue
        .report_outcome(&payload.notification_ids, &payload.failed_ids)
        .await?;
    Ok(Json(counts))
}

/// GET /notifications/user/:user_id: every notification for a user, any status
pub async fn list_user_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let rows = state.queue.list_for_user(user_id).await?;
    Ok(Json(rows))
}

// ── Reports ──────────────────────────────────────────────────

/// POST /reports: store a finished report and optionally queue its delivery
pub async fn create_report(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<CreateReportResponse>), AppError> {
    if !is_valid_report_type(&payload.report_type) {
        return Err(AppError::Validation(format!(
            "report_type must be one of {:?}",
            REPORT_TYPES
        )));
    }
    let sender_method = payload
        .sender_method
        .as_deref()
        .map(require_sender_method)
        .transpose()?;

    let (report, notification) = state
        .reports
        .create_report(
            NewReport {
                user_id: payload.user_id,
                report_type: payload.report_type,
                result: payload.result,
            },
            sender_method,
        )
        .await?;

    tracing::info!(
        report_id = report.id,
        user_id = %report.user_id,
        notification_id = notification.as_ref().map(|n| n.id),
        "report stored"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateReportResponse {
            report,
            notification,
        }),
    ))
}

/// GET /reports/user/:user_id: a user's reports, newest first
pub async fn list_user_reports(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Report>>, AppError> {
    let rows = state.reports.list_reports_for_user(user_id).await?;
    tracing::info!(%user_id, count = rows.len(), "retrieved reports for user");
    Ok(Json(rows))
}
