//! Turning generated reply text into outbound rows.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use autoreply_models::{InboundMessage, Job, JobId, NewOutboundMessage};

use crate::error::QueueResult;
use crate::store::{JobStore, WriteBackOutcome};

/// Reply text meaning "deliberately say nothing".
pub const NO_REPLY_SENTINEL: &str = "[NO_REPLY]";

static SEGMENT_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\t|\n\n").unwrap());

/// Split reply text into message segments.
///
/// Breaks on a tab or a blank line, trims each piece and drops empties.
pub fn split_segments(text: &str) -> Vec<String> {
    SEGMENT_BREAK
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// The job a batch's reply answers: the most recent message.
///
/// Claim order puts the earliest `run_after` first, so a rescheduled older
/// message can lead the batch. Arrival order decides here, ties broken by id.
pub fn reply_target(batch: &[Job]) -> Option<&Job> {
    batch.iter().max_by_key(|job| (job.received_at, job.id))
}

/// Plans and persists reply segments for a batch.
#[derive(Debug, Clone)]
pub struct OutboundWriter {
    sentinel: String,
}

impl Default for OutboundWriter {
    fn default() -> Self {
        Self::new(NO_REPLY_SENTINEL)
    }
}

impl OutboundWriter {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    pub fn is_no_reply(&self, reply: &str) -> bool {
        reply.trim() == self.sentinel
    }

    /// Build the rows for `reply`.
    ///
    /// Every row is attributed to the [`reply_target`] of the batch, which
    /// must be the job `inbound` belongs to. The reply goes back to the sender over
    /// the same provider. A sentinel reply plans nothing.
    pub fn plan(
        &self,
        batch: &[Job],
        inbound: &InboundMessage,
        reply: &str,
    ) -> Vec<NewOutboundMessage> {
        if self.is_no_reply(reply) {
            return Vec::new();
        }

        let Some(target) = reply_target(batch) else {
            return Vec::new();
        };

        split_segments(reply)
            .into_iter()
            .enumerate()
            .map(|(i, body)| NewOutboundMessage {
                conversation_id: target.conversation_id,
                inbound_message_id: target.id,
                provider: inbound.provider.clone(),
                to_address: inbound.from_address.clone(),
                from_address: inbound.to_address.clone(),
                body,
                provider_inbound_sid: Some(inbound.provider_message_sid.clone()),
                sequence_number: i as i32,
            })
            .collect()
    }

    /// Insert `segments` and mark every job in `batch` succeeded atomically.
    pub async fn persist(
        &self,
        store: &dyn JobStore,
        batch: &[Job],
        segments: &[NewOutboundMessage],
    ) -> QueueResult<WriteBackOutcome> {
        let job_ids: Vec<JobId> = batch.iter().map(|job| job.id).collect();
        let outcome = store.write_back(segments, &job_ids).await?;

        debug!(
            planned = segments.len(),
            inserted = outcome.inserted.len(),
            succeeded = outcome.succeeded,
            "Wrote back reply segments"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoreply_models::ConversationId;

    fn inbound_for(job: &Job) -> InboundMessage {
        InboundMessage {
            id: job.id,
            conversation_id: job.conversation_id,
            body: "what's good".into(),
            from_address: "+15550001111".into(),
            to_address: "+15559990000".into(),
            provider: "twilio".into(),
            provider_message_sid: "SM123".into(),
        }
    }

    #[test]
    fn test_split_on_tab_and_blank_line() {
        assert_eq!(split_segments("hey\t\nwhat's good"), vec!["hey", "what's good"]);
        assert_eq!(split_segments("one\n\ntwo\nstill two"), vec!["one", "two\nstill two"]);
        assert_eq!(split_segments("  \t \n\n "), Vec::<String>::new());
    }

    #[test]
    fn test_plan_attributes_to_newest_job() {
        let conversation = ConversationId::new();
        let mut first = Job::queued(conversation, 5);
        first.received_at -= chrono::Duration::seconds(10);
        let last = Job::queued(conversation, 5);
        let inbound = inbound_for(&last);
        let writer = OutboundWriter::default();

        let rows = writer.plan(&[first, last.clone()], &inbound, "hey\t\nwhat's good");

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.inbound_message_id == last.id));
        assert_eq!(rows[0].sequence_number, 0);
        assert_eq!(rows[1].sequence_number, 1);
        assert_eq!(rows[0].to_address, "+15550001111");
        assert_eq!(rows[0].from_address, "+15559990000");
        assert_eq!(rows[0].provider_inbound_sid.as_deref(), Some("SM123"));
    }

    #[test]
    fn test_reply_target_ignores_claim_order() {
        let conversation = ConversationId::new();
        let mut rescheduled = Job::queued(conversation, 5);
        rescheduled.received_at -= chrono::Duration::seconds(30);
        let newer = Job::queued(conversation, 5);
        let mut oldest = Job::queued(conversation, 5);
        oldest.received_at -= chrono::Duration::seconds(60);

        // Primary first, then siblings by arrival.
        let batch = [rescheduled.clone(), oldest, newer.clone()];
        assert_eq!(reply_target(&batch).map(|j| j.id), Some(newer.id));

        let inbound = inbound_for(&newer);
        let rows = OutboundWriter::default().plan(&batch, &inbound, "hey");
        assert_eq!(rows[0].inbound_message_id, newer.id);

        assert!(reply_target(&[]).is_none());
    }

    #[test]
    fn test_sentinel_plans_nothing() {
        let job = Job::queued(ConversationId::new(), 5);
        let inbound = inbound_for(&job);
        let writer = OutboundWriter::default();

        assert!(writer.plan(&[job], &inbound, "  [NO_REPLY]\n").is_empty());
    }
}
