//! reportq: report storage and notification dispatch queue.
//!
//! The binary in `main.rs` wires these modules into an axum server; the
//! integration tests in `tests/` drive them directly.

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod queue;
pub mod store;

use std::sync::Arc;

use queue::NotificationQueue;
use store::{ReportStore, Store};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub queue: NotificationQueue,
    pub reports: Arc<dyn ReportStore>,
    pub config: config::Config,
}

impl AppState {
    pub fn new<S: Store + 'static>(store: Arc<S>, config: config::Config) -> Self {
        let queue = NotificationQueue::new(store.clone(), config.queue_config());
        Self {
            queue,
            reports: store,
            config,
        }
    }
}
