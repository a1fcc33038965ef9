//! Shared data models for the autoreply job queue.
//!
//! This crate provides Serde-serializable types for:
//! - Reply jobs and their lifecycle status
//! - Conversations, inbound messages and transcript entries
//! - Outbound reply rows and their idempotency key
//! - Error classification shared across collaborator boundaries

pub mod classify;
pub mod conversation;
pub mod job;
pub mod outbound;

// Re-export common types
pub use classify::{Classified, ErrorClass};
pub use conversation::{Conversation, ConversationId, Direction, InboundMessage, TimelineEntry};
pub use job::{Job, JobId, JobStatus, ParseStatusError};
pub use outbound::{NewOutboundMessage, OutboundId, OutboundMessage, OutboundStatus};
