//! Batch processing: context, generation, write-back.

use std::sync::Arc;

use autoreply_models::{Job, OutboundId};
use autoreply_queue::{reply_target, JobStore, MessageRepository, OutboundWriter};
use tracing::debug;

use crate::context::ConversationContextProvider;
use crate::error::{WorkerError, WorkerResult};
use crate::generator::{ReplyGenerator, ReplyKind};
use crate::metrics;

/// What happened to a processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Outbound rows created by this run
    pub inserted_ids: Vec<OutboundId>,
    /// Segments the reply was split into
    pub segments: usize,
    pub no_reply: bool,
    pub model: String,
    pub kind: ReplyKind,
    /// Provider message id of the inbound message replied to
    pub inbound_provider_sid: String,
}

impl BatchOutcome {
    /// Rows were planned but an earlier run had already inserted them.
    pub fn already_existed(&self) -> bool {
        !self.no_reply && self.segments > 0 && self.inserted_ids.is_empty()
    }
}

/// Turns a claimed batch into reply rows.
pub struct BatchProcessor {
    store: Arc<dyn JobStore>,
    messages: Arc<dyn MessageRepository>,
    context: Arc<dyn ConversationContextProvider>,
    generator: ReplyGenerator,
    writer: OutboundWriter,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        messages: Arc<dyn MessageRepository>,
        context: Arc<dyn ConversationContextProvider>,
        generator: ReplyGenerator,
    ) -> Self {
        let writer = OutboundWriter::new(generator.no_reply_sentinel());
        Self {
            store,
            messages,
            context,
            generator,
            writer,
        }
    }

    /// Reply to `batch` and mark every job in it succeeded.
    ///
    /// The model call happens between two short store interactions; nothing
    /// is held open while it runs. Errors leave the batch `processing` for
    /// the caller to fail or for lease expiry to reclaim.
    pub async fn process(&self, batch: &[Job]) -> WorkerResult<BatchOutcome> {
        let target = reply_target(batch)
            .ok_or_else(|| WorkerError::not_found("job in empty batch"))?;

        let inbound = self
            .messages
            .inbound_message(target.id)
            .await?
            .ok_or_else(|| WorkerError::not_found(format!("inbound message {}", target.id)))?;

        let context = self.context.render(target.conversation_id).await?;
        let reply = self.generator.generate(&context).await;
        debug!(
            model = %reply.model,
            kind = reply.kind.as_str(),
            chars = reply.text.chars().count(),
            "Reply generated"
        );

        let segments = self.writer.plan(batch, &inbound, &reply.text);
        let outcome = self
            .writer
            .persist(self.store.as_ref(), batch, &segments)
            .await?;

        metrics::record_outbound_inserted(outcome.inserted.len());
        metrics::record_succeeded(outcome.succeeded);

        Ok(BatchOutcome {
            inserted_ids: outcome.inserted,
            segments: segments.len(),
            no_reply: reply.is_no_reply(),
            model: reply.model,
            kind: reply.kind,
            inbound_provider_sid: inbound.provider_message_sid,
        })
    }
}
