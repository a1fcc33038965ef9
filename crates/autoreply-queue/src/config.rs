//! Connection pool configuration.

use std::time::Duration;

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Clone)]
pub struct QueueConfig {
    /// Postgres connection string
    pub database_url: String,
    /// Pool size
    pub max_connections: u32,
    /// How long to wait for a pooled connection
    pub acquire_timeout: Duration,
    /// Idle connections are closed after this long
    pub idle_timeout: Duration,
}

impl QueueConfig {
    /// Create a config for the given URL with default pool sizing.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_millis(5_000),
            idle_timeout: Duration::from_millis(30_000),
        }
    }

    /// Create config from environment variables.
    ///
    /// `DATABASE_URL` is required.
    pub fn from_env() -> QueueResult<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| QueueError::config("Missing required env var: DATABASE_URL"))?;

        if database_url.trim().is_empty() {
            return Err(QueueError::config("DATABASE_URL cannot be empty"));
        }

        Ok(Self {
            database_url,
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            acquire_timeout: Duration::from_millis(
                std::env::var("DATABASE_ACQUIRE_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5_000),
            ),
            idle_timeout: Duration::from_millis(
                std::env::var("DATABASE_IDLE_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30_000),
            ),
        })
    }
}

// The URL carries credentials.
impl std::fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConfig")
            .field("database_url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}
