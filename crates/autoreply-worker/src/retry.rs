//! Retry utilities with exponential backoff.
//!
//! Wraps calls to text-generation backends: only transient failures are
//! retried, each attempt runs under its own deadline, and a small random
//! jitter spreads out concurrent retries.

use std::future::Future;
use std::time::Duration;

use autoreply_llm::LlmError;
use autoreply_models::Classified;
use rand::Rng;
use tracing::{debug, warn};

/// Errors that the retry loop can classify and synthesize on deadline.
pub trait RetryableError: Classified + std::fmt::Display {
    /// Error reported when an attempt exceeds its deadline.
    fn deadline_exceeded(limit: Duration) -> Self;
}

impl RetryableError for LlmError {
    fn deadline_exceeded(limit: Duration) -> Self {
        LlmError::Timeout(format!("attempt exceeded {}ms", limit.as_millis()))
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries, before jitter.
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random delay added to each sleep.
    pub jitter: Duration,
    /// Deadline for a single attempt.
    pub attempt_timeout: Option<Duration>,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(150),
            attempt_timeout: None,
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the jitter bound. `Duration::ZERO` disables jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the per-attempt deadline.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Calculate delay for a given attempt number, without jitter.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed after all retries exhausted, or on a non-retryable error.
    Failed { error: E, attempts: u32 },
}


/// Execute an async operation with retry logic.
///
/// Makes at most `max_retries + 1` attempts. Non-transient errors return
/// immediately. An attempt that overruns `attempt_timeout` is dropped and
/// counts as a transient failure.
///
/// # Example
/// ```ignore
/// let config = RetryConfig::new("primary_model")
///     .with_max_retries(4)
///     .with_attempt_timeout(Duration::from_secs(35));
/// let result = retry_async(&config, || backend.generate(&prompt)).await;
/// ```
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, operation: F) -> RetryResult<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let mut attempt = 0u32;

    loop {
        let outcome = match config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(E::deadline_exceeded(limit)),
            },
            None => operation().await,
        };

        match outcome {
            Ok(value) => return RetryResult::Success(value),
            Err(e) if e.class().is_transient() && attempt < config.max_retries => {
                let delay = config.jittered_delay(attempt);
                attempt += 1;
                crate::metrics::record_retry(&config.operation_name);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return RetryResult::Failed {
                    error: e,
                    attempts: attempt + 1,
                }
            }
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Used by the worker loop to suppress log spam while the store is down.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    /// Create a new failure tracker.
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    /// Get the current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}
