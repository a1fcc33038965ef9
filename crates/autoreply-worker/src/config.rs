//! Worker configuration.

use std::net::SocketAddr;
use std::time::Duration;

use uuid::Uuid;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Lease owner name written to `locked_by`
    pub worker_id: String,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// Lease age after which a processing job may be reclaimed
    pub stale_lock: Duration,
    /// Deadline for a single model attempt
    pub model_timeout: Duration,
    /// Longest reply kept before truncation, in chars
    pub max_reply_chars: usize,
    /// Apply schema migrations on startup
    pub run_migrations: bool,
    /// Prometheus listener; metrics are not exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            poll_interval: Duration::from_millis(1000),
            stale_lock: Duration::from_secs(120),
            model_timeout: Duration::from_millis(35_000),
            max_reply_chars: 1200,
            run_migrations: false,
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            worker_id: std::env::var("WORKER_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(default_worker_id),
            poll_interval: Duration::from_millis(
                std::env::var("REPLY_WORKER_POLL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            stale_lock: Duration::from_secs(
                std::env::var("REPLY_JOB_STALE_LOCK_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            model_timeout: Duration::from_millis(
                std::env::var("MODEL_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(35_000),
            ),
            max_reply_chars: std::env::var("MAX_REPLY_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1200),
            run_migrations: std::env::var("RUN_MIGRATIONS")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Pause after a loop error before polling again.
    pub fn loop_error_cooldown(&self) -> Duration {
        self.poll_interval.min(Duration::from_millis(2000))
    }
}

fn default_worker_id() -> String {
    format!("reply-worker-{}", Uuid::new_v4())
}
