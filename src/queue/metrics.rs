//! Prometheus counters for queue traffic.
//!
//! Registered lazily in the global default registry and exposed through
//! `/metrics` via `encode_metrics()`.

use once_cell::sync::Lazy;
use prometheus::{opts, register_counter_vec, register_int_counter, CounterVec, Encoder, IntCounter, TextEncoder};

use crate::models::notification::{OutcomeCounts, SweepOutcome};

/// Distinct sender methods tracked before bucketing to "other".
const MAX_SENDER_LABELS: usize = 64;

struct QueueMetrics {
    reserved_total: CounterVec,
    outcome_total: CounterVec,
    sweep_recovered_total: CounterVec,
    sweep_failures_total: IntCounter,
    seen_senders: std::sync::Mutex<Vec<String>>,
}

static METRICS: Lazy<QueueMetrics> = Lazy::new(|| QueueMetrics {
    reserved_total: register_counter_vec!(
        opts!("reportq_notifications_reserved_total", "Notifications handed to sender workers"),
        &["sender_method"]
    )
    .expect("failed to register reportq_notifications_reserved_total"),
    outcome_total: register_counter_vec!(
        opts!("reportq_notifications_outcome_total", "Worker-reported delivery outcomes"),
        &["outcome"]
    )
    .expect("failed to register reportq_notifications_outcome_total"),
    sweep_recovered_total: register_counter_vec!(
        opts!("reportq_sweep_recovered_total", "Stuck notifications handled by the recovery sweep"),
        &["action"]
    )
    .expect("failed to register reportq_sweep_recovered_total"),
    sweep_failures_total: register_int_counter!(
        "reportq_sweep_failures_total",
        "Recovery sweep iterations that failed"
    )
    .expect("failed to register reportq_sweep_failures_total"),
    seen_senders: std::sync::Mutex::new(Vec::new()),
});

/// Cardinality guard: sender methods are caller-supplied strings.
fn sender_label(sender_method: &str) -> String {
    let Ok(mut seen) = METRICS.seen_senders.lock() else {
        return "other".to_string();
    };
    if seen.iter().any(|s| s == sender_method) {
        return sender_method.to_string();
    }
    if seen.len() >= MAX_SENDER_LABELS {
        return "other".to_string();
    }
    seen.push(sender_method.to_string());
    sender_method.to_string()
}

pub fn record_reserved(sender_method: &str, count: usize) {
    let label = sender_label(sender_method);
    METRICS
        .reserved_total
        .with_label_values(&[label.as_str()])
        .inc_by(count as f64);
}

pub fn record_outcome(counts: &OutcomeCounts) {
    METRICS
        .outcome_total
        .with_label_values(&["success"])
        .inc_by(counts.success_count as f64);
    METRICS
        .outcome_total
        .with_label_values(&["failed"])
        .inc_by(counts.failed_count as f64);
}

pub fn record_sweep(outcome: &SweepOutcome) {
    METRICS
        .sweep_recovered_total
        .with_label_values(&["requeued"])
        .inc_by(outcome.requeued.len() as f64);
    METRICS
        .sweep_recovered_total
        .with_label_values(&["errored"])
        .inc_by(outcome.errored.len() as f64);
}

pub fn record_sweep_failure() {
    METRICS.sweep_failures_total.inc();
}

/// Encode all registered metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
