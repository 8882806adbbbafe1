use std::time::Duration;

use crate::queue::QueueConfig;

/// Upper bound for NOTIFICATION_RETRY_TIMEOUT_MINUTES (one year).
pub const MAX_RETRY_TIMEOUT_MINUTES: u64 = 525_600;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// When set, every non-health route requires a matching `X-API-Key` header.
    pub api_key: Option<String>,
    /// Minutes an `in_progress` notification may go untouched before it counts as stuck.
    /// Set via NOTIFICATION_RETRY_TIMEOUT_MINUTES. Default: 5.
    pub notification_retry_timeout_minutes: u64,
    /// Stuck reclaims allowed before a notification is moved to `error`.
    /// Set via NOTIFICATION_MAX_RETRY_COUNT. Default: 2.
    pub notification_max_retry_count: i32,
    /// Period of the recovery sweep in seconds.
    /// Set via NOTIFICATION_SWEEP_INTERVAL_SECS. Default: 60.
    pub notification_sweep_interval_secs: u64,
    pub dashboard_origin: Option<String>,
}

impl Config {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            stuck_timeout: Duration::from_secs(self.notification_retry_timeout_minutes.saturating_mul(60)),
            max_retry_count: self.notification_max_retry_count,
            sweep_interval: Duration::from_secs(self.notification_sweep_interval_secs.max(1)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8008,
            database_url: "postgres://localhost/reportq".into(),
            api_key: None,
            notification_retry_timeout_minutes: 5,
            notification_max_retry_count: 2,
            notification_sweep_interval_secs: 60,
            dashboard_origin: None,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Ok(from_lookup(|key| std::env::var(key).ok()))
}

/// Build a config from an arbitrary key lookup. Unparseable values fall back
/// to their defaults.
pub fn from_lookup<F>(lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();
    let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<i64>().ok());

    Config {
        port: lookup("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
        api_key: lookup("API_KEY").filter(|k| !k.is_empty()),
        notification_retry_timeout_minutes: parsed("NOTIFICATION_RETRY_TIMEOUT_MINUTES")
            .map(|v| v.clamp(1, MAX_RETRY_TIMEOUT_MINUTES as i64) as u64)
            .unwrap_or(defaults.notification_retry_timeout_minutes),
        notification_max_retry_count: parsed("NOTIFICATION_MAX_RETRY_COUNT")
            .map(|v| v.clamp(0, i32::MAX as i64) as i32)
            .unwrap_or(defaults.notification_max_retry_count),
        notification_sweep_interval_secs: parsed("NOTIFICATION_SWEEP_INTERVAL_SECS")
            .filter(|v| *v > 0)
            .map(|v| v as u64)
            .unwrap_or(defaults.notification_sweep_interval_secs),
        dashboard_origin: lookup("DASHBOARD_ORIGIN"),
    }
}
