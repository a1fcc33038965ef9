//! Conversation context rendering.

use std::sync::Arc;

use async_trait::async_trait;
use autoreply_models::{ConversationId, Direction, TimelineEntry};
use autoreply_queue::MessageRepository;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Produces the text the model sees for a conversation.
#[async_trait]
pub trait ConversationContextProvider: Send + Sync {
    async fn render(&self, conversation_id: ConversationId) -> WorkerResult<String>;
}

/// Renders the delivered back-and-forth with the correspondent as a transcript.
pub struct TranscriptContextProvider {
    messages: Arc<dyn MessageRepository>,
}

impl TranscriptContextProvider {
    pub fn new(messages: Arc<dyn MessageRepository>) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl ConversationContextProvider for TranscriptContextProvider {
    async fn render(&self, conversation_id: ConversationId) -> WorkerResult<String> {
        let conversation = self
            .messages
            .conversation(conversation_id)
            .await?
            .ok_or_else(|| WorkerError::not_found(format!("conversation {}", conversation_id)))?;

        let timeline = self
            .messages
            .timeline(conversation_id, &conversation.user_number)
            .await?;

        debug!(
            conversation_id = %conversation_id,
            entries = timeline.len(),
            "Loaded conversation timeline"
        );

        Ok(render_transcript(&timeline))
    }
}

/// `USER: body` / `ASSISTANT: body` lines, oldest first.
pub fn render_transcript(timeline: &[TimelineEntry]) -> String {
    timeline
        .iter()
        .map(|entry| {
            let speaker = match entry.direction {
                Direction::Inbound => "USER",
                Direction::Outbound => "ASSISTANT",
            };
            format!("{}: {}", speaker, entry.body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoreply_models::{Conversation, InboundMessage, Job, NewOutboundMessage, OutboundStatus};
    use autoreply_queue::{Clock, JobStore, ManualClock, MemoryStore};
    use chrono::{TimeZone, Utc};

    fn entry(direction: Direction, body: &str) -> TimelineEntry {
        TimelineEntry {
            direction,
            body: body.into(),
            from_address: String::new(),
            to_address: String::new(),
            provider: "twilio".into(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_render_transcript_labels_speakers() {
        let timeline = vec![
            entry(Direction::Inbound, "hey"),
            entry(Direction::Outbound, "hi there"),
            entry(Direction::Inbound, "what's up"),
        ];
        assert_eq!(
            render_transcript(&timeline),
            "USER: hey\nASSISTANT: hi there\nUSER: what's up"
        );
        assert_eq!(render_transcript(&[]), "");
    }

    #[tokio::test]
    async fn test_missing_conversation_is_not_found() {
        let provider = TranscriptContextProvider::new(Arc::new(MemoryStore::new()));
        let err = provider.render(ConversationId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_render_merges_inbound_and_delivered_outbound() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let conversation = Conversation {
            id: ConversationId::new(),
            channel: "sms".into(),
            user_number: "+15550001111".into(),
        };
        store.seed_conversation(conversation.clone());

        let mut job = Job::queued(conversation.id, 5);
        job.received_at = clock.now();
        let inbound = InboundMessage {
            id: job.id,
            conversation_id: conversation.id,
            body: "hey".into(),
            from_address: "+15550001111".into(),
            to_address: "+15559990000".into(),
            provider: "twilio".into(),
            provider_message_sid: "SM1".into(),
        };
        store.enqueue(job.clone(), inbound);

        clock.advance(std::time::Duration::from_secs(5));
        let reply = |seq: i32, body: &str| NewOutboundMessage {
            conversation_id: conversation.id,
            inbound_message_id: job.id,
            provider: "twilio".into(),
            to_address: "+15550001111".into(),
            from_address: "+15559990000".into(),
            body: body.into(),
            provider_inbound_sid: Some("SM1".into()),
            sequence_number: seq,
        };
        let outcome = store
            .write_back(&[reply(0, "yo"), reply(1, "not sent yet")], &[job.id])
            .await
            .unwrap();
        store
            .set_outbound_status(outcome.inserted[0], OutboundStatus::Sent)
            .unwrap();

        let provider = TranscriptContextProvider::new(store);
        let transcript = provider.render(conversation.id).await.unwrap();
        assert_eq!(transcript, "USER: hey\nASSISTANT: yo");
    }
}
