//! Reply policy: instructions and sentinel handed to the model.

use autoreply_llm::Prompt;
use autoreply_queue::NO_REPLY_SENTINEL;
use tracing::{debug, warn};

/// Default instruction block used when no prompt file is configured.
const DEFAULT_INSTRUCTIONS: &str = r#"You are replying to a text-message conversation.
The transcript lists earlier messages, oldest first, as "USER:" and "ASSISTANT:" lines.
Write the ASSISTANT's next reply to the most recent USER messages.

Keep replies short and conversational, the way people actually text.
To send more than one message, separate them with a blank line.
If the conversation needs no reply at all, answer with exactly [NO_REPLY] and nothing else."#;

/// Builds model prompts from rendered conversation context.
pub trait ReplyPolicy: Send + Sync {
    fn build_prompt(&self, context: &str) -> Prompt;

    /// Model output that means "send nothing".
    fn no_reply_sentinel(&self) -> &str;
}

/// Fixed instructions, optionally loaded from `PROMPT_FILE`.
#[derive(Debug, Clone)]
pub struct StaticReplyPolicy {
    instructions: String,
    sentinel: String,
}

impl Default for StaticReplyPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTIONS)
    }
}

impl StaticReplyPolicy {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            sentinel: NO_REPLY_SENTINEL.to_string(),
        }
    }

    /// Use `PROMPT_FILE` when set and readable, else the built-in instructions.
    pub fn from_env() -> Self {
        match load_prompt_from_file() {
            Some(instructions) => Self::new(instructions),
            None => Self::default(),
        }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

impl ReplyPolicy for StaticReplyPolicy {
    fn build_prompt(&self, context: &str) -> Prompt {
        Prompt::new(self.instructions.clone(), context)
    }

    fn no_reply_sentinel(&self) -> &str {
        &self.sentinel
    }
}

fn load_prompt_from_file() -> Option<String> {
    let prompt_path = std::env::var("PROMPT_FILE").ok()?;
    match std::fs::read_to_string(&prompt_path) {
        Ok(contents) if !contents.trim().is_empty() => {
            debug!(path = %prompt_path, "Loaded reply instructions from file");
            Some(contents)
        }
        Ok(_) => {
            warn!(path = %prompt_path, "Prompt file is empty, using built-in instructions");
            None
        }
        Err(e) => {
            warn!(path = %prompt_path, error = %e, "Failed to read prompt file, using built-in instructions");
            None
        }
    }
}
