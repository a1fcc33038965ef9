//! Queue error types.

use autoreply_models::{Classified, ErrorClass};
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error in {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Constraint conflict in {operation}: {message}")]
    Conflict { operation: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to decode row: {0}")]
    Decode(String),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl QueueError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound(_))
    }
}

impl Classified for QueueError {
    fn class(&self) -> ErrorClass {
        match self {
            QueueError::Unavailable(_) => ErrorClass::Transient,
            QueueError::NotFound(_) => ErrorClass::NotFound,
            QueueError::Conflict { .. } => ErrorClass::Conflict,
            QueueError::Config(_)
            | QueueError::Database { .. }
            | QueueError::Decode(_)
            | QueueError::Migration(_) => ErrorClass::Terminal,
        }
    }
}
