//! Worker error types.

use autoreply_llm::LlmError;
use autoreply_models::{Classified, ErrorClass};
use autoreply_queue::QueueError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Model error: {0}")]
    Llm(#[from] LlmError),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Missing data the batch depends on (inbound row, conversation).
    pub fn is_not_found(&self) -> bool {
        match self {
            WorkerError::NotFound(_) => true,
            WorkerError::Queue(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl Classified for WorkerError {
    fn class(&self) -> ErrorClass {
        match self {
            WorkerError::NotFound(_) => ErrorClass::NotFound,
            WorkerError::Queue(e) => e.class(),
            WorkerError::Llm(e) => e.class(),
            WorkerError::ConfigError(_) | WorkerError::Metrics(_) => ErrorClass::Terminal,
        }
    }
}
