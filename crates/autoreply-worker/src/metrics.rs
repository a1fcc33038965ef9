//! Prometheus metrics for the reply worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::Metrics(e.to_string()))
}

/// Metric names as constants for consistency.
pub mod names {
    // Queue metrics
    pub const JOBS_CLAIMED_TOTAL: &str = "autoreply_jobs_claimed_total";
    pub const JOBS_SUCCEEDED_TOTAL: &str = "autoreply_jobs_succeeded_total";
    pub const JOBS_FAILED_TOTAL: &str = "autoreply_jobs_failed_total";
    pub const OUTBOUND_INSERTED_TOTAL: &str = "autoreply_outbound_inserted_total";

    // Generation metrics
    pub const GENERATION_TOTAL: &str = "autoreply_generation_total";
    pub const LLM_RETRIES_TOTAL: &str = "autoreply_llm_retries_total";

    // Loop metrics
    pub const BATCH_DURATION_SECONDS: &str = "autoreply_batch_duration_seconds";
    pub const LOOP_ERRORS_TOTAL: &str = "autoreply_loop_errors_total";
}

/// Record a claimed batch.
pub fn record_claimed(batch_size: usize) {
    counter!(names::JOBS_CLAIMED_TOTAL).increment(batch_size as u64);
}

/// Record jobs moved to succeeded.
pub fn record_succeeded(count: u64) {
    counter!(names::JOBS_SUCCEEDED_TOTAL).increment(count);
}

/// Record jobs moved to failed or deadletter.
pub fn record_failed(disposition: &str, count: u64) {
    let labels = [("disposition", disposition.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(count);
}

/// Record newly inserted outbound rows.
pub fn record_outbound_inserted(count: usize) {
    counter!(names::OUTBOUND_INSERTED_TOTAL).increment(count as u64);
}

/// Record a generation outcome.
pub fn record_generation(model: &str, kind: &str) {
    let labels = [("model", model.to_string()), ("kind", kind.to_string())];
    counter!(names::GENERATION_TOTAL, &labels).increment(1);
}

/// Record a retried backend attempt.
pub fn record_retry(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!(names::LLM_RETRIES_TOTAL, &labels).increment(1);
}

/// Record batch processing duration.
pub fn record_batch_duration(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    histogram!(names::BATCH_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a loop-level error.
pub fn record_loop_error() {
    counter!(names::LOOP_ERRORS_TOTAL).increment(1);
}
