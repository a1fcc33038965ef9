//! Job-level retry backoff and dead-letter decisions.
//!
//! `delay(attempts) = min(cap, floor(base * growth^attempts))`. With the
//! defaults (base 5s, growth 3, cap 300s) the first retry waits 15s, then
//! 45s, 135s and 300s from the fourth failure on.

use std::time::Duration;

use autoreply_models::Job;

/// Exponential backoff for failed reply jobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Base delay in seconds
    pub base_secs: u64,
    /// Growth factor per attempt
    pub growth: f64,
    /// Upper bound in seconds
    pub cap_secs: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_secs: 5,
            growth: 3.0,
            cap_secs: 300,
        }
    }
}

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FailureDisposition {
    /// Attempt count after this failure is recorded
    pub attempts_after: i32,
    /// Whether the job is parked in the dead-letter state
    pub is_dead: bool,
    /// Delay before the job is eligible again (zero when dead)
    pub delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base_secs: u64, growth: f64, cap_secs: u64) -> Self {
        Self {
            base_secs,
            growth,
            cap_secs,
        }
    }

    /// Create policy from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_secs: std::env::var("REPLY_BACKOFF_BASE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.base_secs),
            growth: std::env::var("REPLY_BACKOFF_GROWTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|g: &f64| g.is_finite() && *g >= 1.0)
                .unwrap_or(defaults.growth),
            cap_secs: std::env::var("REPLY_BACKOFF_CAP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cap_secs),
        }
    }

    /// Delay in whole seconds for a job that has now failed `attempts` times.
    pub fn delay_secs(&self, attempts: u32) -> u64 {
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let raw = self.base_secs as f64 * self.growth.powi(exponent);
        let cap = self.cap_secs as f64;
        if !raw.is_finite() || raw >= cap {
            self.cap_secs
        } else {
            raw.floor() as u64
        }
    }

    /// Delay for a job that has now failed `attempts` times.
    pub fn delay(&self, attempts: u32) -> Duration {
        Duration::from_secs(self.delay_secs(attempts))
    }

    /// Decide what a failed attempt means for `job`.
    pub fn plan(&self, job: &Job) -> FailureDisposition {
        let attempts_after = job.attempts.saturating_add(1);
        let is_dead = attempts_after >= job.max_attempts;
        let delay = if is_dead {
            Duration::ZERO
        } else {
            self.delay(attempts_after.max(0) as u32)
        };

        FailureDisposition {
            attempts_after,
            is_dead,
            delay,
        }
    }
}
