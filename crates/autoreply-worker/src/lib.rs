//! Reply worker.
//!
//! This crate provides:
//! - Bounded retry with per-attempt timeouts for model calls
//! - Reply generation with primary/fallback escalation
//! - Transcript rendering and a pluggable reply policy
//! - The batch processor and the polling worker loop
//! - Graceful shutdown

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod generator;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod processor;
pub mod retry;

pub use config::WorkerConfig;
pub use context::{render_transcript, ConversationContextProvider, TranscriptContextProvider};
pub use error::{WorkerError, WorkerResult};
pub use executor::{Tick, WorkerLoop};
pub use generator::{GeneratedReply, ReplyGenerator, ReplyKind};
pub use logging::BatchLogger;
pub use policy::{ReplyPolicy, StaticReplyPolicy};
pub use processor::{BatchOutcome, BatchProcessor};
pub use retry::{retry_async, FailureTracker, RetryConfig, RetryResult, RetryableError};
