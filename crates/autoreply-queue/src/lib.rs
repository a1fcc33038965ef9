//! Postgres-backed reply-job queue.
//!
//! This crate provides:
//! - Lease-based claiming with per-conversation batching (`FOR UPDATE SKIP LOCKED`)
//! - Retry backoff and dead-letter bookkeeping
//! - Idempotent, transactional write-back of reply segments
//! - An in-memory store with identical semantics for tests and local runs

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod memory;
pub mod outbound;
pub mod postgres;
pub mod store;

pub use backoff::{BackoffPolicy, FailureDisposition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use memory::MemoryStore;
pub use outbound::{reply_target, split_segments, OutboundWriter, NO_REPLY_SENTINEL};
pub use postgres::PgStore;
pub use store::{truncate_error, JobStore, MessageRepository, WriteBackOutcome, MAX_LAST_ERROR_CHARS};
