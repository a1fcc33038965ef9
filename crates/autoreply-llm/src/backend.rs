//! Backend abstraction.

use async_trait::async_trait;

use crate::error::LlmResult;

/// A prompt split into system instructions and user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub instructions: String,
    pub input: String,
}

impl Prompt {
    pub fn new(instructions: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            input: input.into(),
        }
    }
}

/// A single text-generation model.
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    /// Model identifier, recorded with each reply.
    fn model(&self) -> &str;

    /// Generate reply text. An empty string is a valid (if useless) answer.
    async fn generate(&self, prompt: &Prompt) -> LlmResult<String>;
}
