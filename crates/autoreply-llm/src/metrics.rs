//! Backend request metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Backend requests by provider, model and outcome.
    pub const REQUESTS_TOTAL: &str = "autoreply_llm_requests_total";

    /// Backend request latency in seconds by provider and model.
    pub const LATENCY_SECONDS: &str = "autoreply_llm_latency_seconds";
}

/// Record a completed backend request. `status` is the HTTP status, or 0
/// when no response was received.
pub fn record_request(provider: &str, model: &str, status: u16, latency_secs: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "provider" => provider.to_string(),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "provider" => provider.to_string(),
        "model" => model.to_string()
    )
    .record(latency_secs);
}
