//! Store abstractions.
//!
//! `JobStore` is the only mutation surface for reply jobs. `MessageRepository`
//! is the read side used to address replies and render transcripts.

use std::time::Duration;

use async_trait::async_trait;

use autoreply_models::{
    Conversation, ConversationId, InboundMessage, Job, JobId, NewOutboundMessage, OutboundId,
    TimelineEntry,
};

use crate::error::QueueResult;

/// Longest `last_error` kept on a job row, in chars.
pub const MAX_LAST_ERROR_CHARS: usize = 2000;

/// Result of a transactional write-back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBackOutcome {
    /// Outbound rows actually inserted (conflicts are skipped)
    pub inserted: Vec<OutboundId>,
    /// Jobs transitioned to succeeded by this call
    pub succeeded: u64,
}

/// Durable job-table operations.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Lease one eligible job plus every other eligible job in its conversation.
    ///
    /// Returns `[primary, ...rest]` with `rest` ordered by arrival, or an
    /// empty vec when nothing is eligible. The primary is the job with the
    /// earliest `run_after`, which is not necessarily the newest message;
    /// use [`reply_target`](crate::outbound::reply_target) to find that.
    /// The claim is committed before this returns.
    async fn claim_batch(&self, stale_lock: Duration, worker_id: &str) -> QueueResult<Vec<Job>>;

    /// Mark jobs succeeded. Terminal rows are left alone; returns rows changed.
    async fn mark_succeeded(&self, job_ids: &[JobId]) -> QueueResult<u64>;

    /// Record a failed attempt for each job.
    ///
    /// Increments `attempts`, moves the row to `deadletter` when `is_dead`
    /// (keeping `run_after`), otherwise to `failed` with
    /// `run_after = now + delay`. Clears the lease and stores `last_error`
    /// bounded by [`truncate_error`]. A row still `processing` under another
    /// worker's lease is left alone.
    async fn mark_failed_or_deadletter(
        &self,
        job_ids: &[JobId],
        worker_id: &str,
        is_dead: bool,
        delay: Duration,
        last_error: &str,
    ) -> QueueResult<u64>;

    /// Insert reply segments and mark the jobs succeeded in one transaction.
    ///
    /// Segments whose `(inbound_message_id, sequence_number)` already exist
    /// are skipped and contribute no id.
    async fn write_back(
        &self,
        segments: &[NewOutboundMessage],
        job_ids: &[JobId],
    ) -> QueueResult<WriteBackOutcome>;

    /// Release pooled resources.
    async fn close(&self);
}

/// Read-only message lookups.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn inbound_message(&self, id: JobId) -> QueueResult<Option<InboundMessage>>;

    async fn conversation(&self, id: ConversationId) -> QueueResult<Option<Conversation>>;

    /// Inbound messages from `user_number` and delivered outbound messages to
    /// it, oldest first.
    async fn timeline(
        &self,
        conversation_id: ConversationId,
        user_number: &str,
    ) -> QueueResult<Vec<TimelineEntry>>;
}

/// Bound error text stored on a job row.
pub fn truncate_error(message: &str) -> String {
    let total = message.chars().count();
    if total <= MAX_LAST_ERROR_CHARS {
        return message.to_string();
    }

    let kept: String = message.chars().take(MAX_LAST_ERROR_CHARS).collect();
    format!("{}…[truncated {} chars]", kept, total - MAX_LAST_ERROR_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error_keeps_short_text() {
        assert_eq!(truncate_error("boom"), "boom");
        let exact = "x".repeat(MAX_LAST_ERROR_CHARS);
        assert_eq!(truncate_error(&exact), exact);
    }

    #[test]
    fn test_truncate_error_marks_dropped_chars() {
        let long = "é".repeat(MAX_LAST_ERROR_CHARS + 25);
        let truncated = truncate_error(&long);
        assert!(truncated.ends_with("…[truncated 25 chars]"));
        assert!(truncated.starts_with(&"é".repeat(MAX_LAST_ERROR_CHARS)));
    }
}
