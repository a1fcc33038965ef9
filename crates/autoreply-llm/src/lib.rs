//! Text-generation backends.
//!
//! This crate provides:
//! - A `ReplyBackend` trait that turns a prompt into reply text
//! - An OpenAI Responses API backend
//! - A Gemini `generateContent` backend
//! - Typed, classified errors for upstream failures

pub mod backend;
pub mod config;
pub mod error;
pub mod gemini;
pub mod metrics;
pub mod openai;

pub use backend::{Prompt, ReplyBackend};
pub use config::{Backends, LlmConfig, LlmProvider};
pub use error::{LlmError, LlmResult};
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
