//! Reply generation with primary/fallback escalation.
//!
//! `generate` never fails: overloaded primaries escalate to the fallback
//! model, and anything else ends in a fixed degraded reply so the
//! correspondent always hears back.

use std::sync::Arc;
use std::time::Duration;

use autoreply_llm::{Backends, LlmError, ReplyBackend};
use autoreply_models::Classified;
use tracing::{info, warn};

use crate::metrics;
use crate::policy::ReplyPolicy;
use crate::retry::{retry_async, RetryConfig, RetryResult};

/// Reply when there is nothing to respond to.
pub const EMPTY_CONTEXT_REPLY: &str = "Send me a message and I'll reply.";

/// Reply when the model answered with nothing.
pub const EMPTY_REPLY: &str = "I didn't catch that, try again?";

/// Reply when no model could answer.
pub const DEGRADED_REPLY: &str = "I'm a bit jammed up right now, try again in a minute.";

/// Model label for replies produced without calling a model.
pub const MODEL_NONE: &str = "none";

/// Model label for the degraded reply.
pub const MODEL_ERROR: &str = "error";

/// How a reply came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// Model text, possibly truncated
    Text,
    /// Model chose to stay silent
    NoReply,
    /// Conversation had no renderable history
    EmptyContext,
    /// Model returned empty text
    Empty,
    /// Primary and fallback both unavailable
    Degraded,
}

impl ReplyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyKind::Text => "text",
            ReplyKind::NoReply => "no_reply",
            ReplyKind::EmptyContext => "empty_context",
            ReplyKind::Empty => "empty",
            ReplyKind::Degraded => "degraded",
        }
    }
}

/// Reply text plus the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReply {
    pub text: String,
    pub model: String,
    pub kind: ReplyKind,
}

impl GeneratedReply {
    fn new(text: impl Into<String>, model: impl Into<String>, kind: ReplyKind) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            kind,
        }
    }

    pub fn is_no_reply(&self) -> bool {
        self.kind == ReplyKind::NoReply
    }
}

/// Generates replies from conversation context.
pub struct ReplyGenerator {
    backends: Backends,
    policy: Arc<dyn ReplyPolicy>,
    primary_retry: RetryConfig,
    fallback_retry: RetryConfig,
    max_reply_chars: usize,
}

impl ReplyGenerator {
    pub fn new(
        backends: Backends,
        policy: Arc<dyn ReplyPolicy>,
        model_timeout: Duration,
        max_reply_chars: usize,
    ) -> Self {
        let primary_retry = RetryConfig::new("primary_model")
            .with_max_retries(4)
            .with_base_delay(Duration::from_millis(350))
            .with_max_delay(Duration::from_millis(3500))
            .with_attempt_timeout(model_timeout);
        let fallback_retry = RetryConfig::new("fallback_model")
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(400))
            .with_max_delay(Duration::from_millis(2500))
            .with_attempt_timeout(model_timeout);

        Self {
            backends,
            policy,
            primary_retry,
            fallback_retry,
            max_reply_chars,
        }
    }

    /// Override the retry schedules.
    pub fn with_retry(mut self, primary: RetryConfig, fallback: RetryConfig) -> Self {
        self.primary_retry = primary;
        self.fallback_retry = fallback;
        self
    }

    pub fn no_reply_sentinel(&self) -> &str {
        self.policy.no_reply_sentinel()
    }

    /// Produce a reply for `context`.
    pub async fn generate(&self, context: &str) -> GeneratedReply {
        let reply = self.generate_inner(context).await;
        metrics::record_generation(&reply.model, reply.kind.as_str());
        reply
    }

    async fn generate_inner(&self, context: &str) -> GeneratedReply {
        if context.trim().is_empty() {
            return GeneratedReply::new(EMPTY_CONTEXT_REPLY, MODEL_NONE, ReplyKind::EmptyContext);
        }

        let prompt = self.policy.build_prompt(context);
        let primary = &self.backends.primary;

        let error = match retry_async(&self.primary_retry, || primary.generate(&prompt)).await {
            RetryResult::Success(text) => return self.finish(&text, primary.as_ref()),
            RetryResult::Failed { error, attempts } => {
                warn!(
                    model = %primary.model(),
                    attempts,
                    status = ?error.http_status(),
                    error = %error,
                    "Primary model failed"
                );
                error
            }
        };

        if !error.is_overloaded() {
            return degraded(&error);
        }

        let fallback = &self.backends.fallback;
        info!(
            primary = %primary.model(),
            fallback = %fallback.model(),
            "Primary model overloaded, escalating to fallback"
        );

        match retry_async(&self.fallback_retry, || fallback.generate(&prompt)).await {
            RetryResult::Success(text) => self.finish(&text, fallback.as_ref()),
            RetryResult::Failed { error, attempts } => {
                warn!(
                    model = %fallback.model(),
                    attempts,
                    status = ?error.http_status(),
                    error = %error,
                    "Fallback model failed"
                );
                degraded(&error)
            }
        }
    }

    fn finish(&self, raw: &str, backend: &dyn ReplyBackend) -> GeneratedReply {
        let text = raw.trim();
        if text.is_empty() {
            return GeneratedReply::new(EMPTY_REPLY, backend.model(), ReplyKind::Empty);
        }
        if text == self.policy.no_reply_sentinel() {
            return GeneratedReply::new(text, backend.model(), ReplyKind::NoReply);
        }
        GeneratedReply::new(
            truncate_reply(text, self.max_reply_chars),
            backend.model(),
            ReplyKind::Text,
        )
    }
}

fn degraded(error: &LlmError) -> GeneratedReply {
    warn!(error = %error, class = %error.class(), "Sending degraded reply");
    GeneratedReply::new(DEGRADED_REPLY, MODEL_ERROR, ReplyKind::Degraded)
}

/// Cut `text` to `max_chars` chars, marking the cut with `…`.
pub fn truncate_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}
