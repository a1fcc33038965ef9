//! Structured batch logging utilities.
//!
//! Provides consistent, structured logging for batch processing with
//! tracing spans and contextual information.

use autoreply_models::Job;
use autoreply_queue::reply_target;
use tracing::{error, info, warn, Span};

use crate::processor::BatchOutcome;

/// Batch logger for structured logging with consistent formatting.
///
/// Every line carries the worker, the conversation, the job the replies are
/// attributed to (the newest in the batch) and the batch size.
#[derive(Debug, Clone)]
pub struct BatchLogger {
    worker_id: String,
    conversation_id: String,
    job_id: String,
    batch_size: usize,
}

impl BatchLogger {
    /// Create a logger for a claimed batch.
    pub fn new(worker_id: &str, batch: &[Job]) -> Self {
        let (conversation_id, job_id) = reply_target(batch)
            .map(|job| (job.conversation_id.to_string(), job.id.to_string()))
            .unwrap_or_default();

        Self {
            worker_id: worker_id.to_string(),
            conversation_id,
            job_id,
            batch_size: batch.len(),
        }
    }

    /// Log a freshly claimed batch.
    pub fn log_claimed(&self) {
        info!(
            worker_id = %self.worker_id,
            conversation_id = %self.conversation_id,
            job_id = %self.job_id,
            batch_size = self.batch_size,
            "Batch claimed"
        );
    }

    /// Log how a processed batch ended.
    pub fn log_outcome(&self, outcome: &BatchOutcome) {
        if outcome.no_reply {
            info!(
                worker_id = %self.worker_id,
                conversation_id = %self.conversation_id,
                job_id = %self.job_id,
                batch_size = self.batch_size,
                model = %outcome.model,
                "no reply"
            );
        } else if outcome.already_existed() {
            info!(
                worker_id = %self.worker_id,
                conversation_id = %self.conversation_id,
                job_id = %self.job_id,
                batch_size = self.batch_size,
                segments = outcome.segments,
                "outbound already existed (idempotent)"
            );
        } else {
            info!(
                worker_id = %self.worker_id,
                conversation_id = %self.conversation_id,
                job_id = %self.job_id,
                batch_size = self.batch_size,
                model = %outcome.model,
                kind = outcome.kind.as_str(),
                inbound_sid = %outcome.inbound_provider_sid,
                "queued {} outbound", outcome.inserted_ids.len()
            );
        }
    }

    /// Log a batch that failed processing.
    pub fn log_failure(&self, message: &str) {
        warn!(
            worker_id = %self.worker_id,
            conversation_id = %self.conversation_id,
            job_id = %self.job_id,
            batch_size = self.batch_size,
            "Batch failed: {}", message
        );
    }

    /// Log jobs moved to failed or deadletter.
    pub fn log_marked(&self, disposition: &str, count: u64, attempts: i32) {
        warn!(
            worker_id = %self.worker_id,
            conversation_id = %self.conversation_id,
            job_id = %self.job_id,
            attempts,
            "Marked {} job(s) {}", count, disposition
        );
    }

    /// Log an error the worker cannot act on.
    pub fn log_error(&self, message: &str) {
        error!(
            worker_id = %self.worker_id,
            conversation_id = %self.conversation_id,
            job_id = %self.job_id,
            batch_size = self.batch_size,
            "Batch error: {}", message
        );
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Create a tracing span for this batch.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "batch",
            worker_id = %self.worker_id,
            conversation_id = %self.conversation_id,
            job_id = %self.job_id,
            batch_size = self.batch_size
        )
    }
}
