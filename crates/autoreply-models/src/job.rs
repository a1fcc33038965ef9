//! Reply job definitions.
//!
//! Every inbound message is a reply job. The job columns live on the
//! inbound-message row itself, so a job id is also the inbound message id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::conversation::ConversationId;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Job status in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its first attempt
    #[default]
    Queued,
    /// Leased by a worker
    Processing,
    /// Reply recorded
    Succeeded,
    /// Last attempt failed; eligible again after `run_after`
    Failed,
    /// Parked for manual inspection
    Deadletter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Deadletter => "deadletter",
        }
    }

    /// Terminal rows are never mutated by the queue again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Deadletter)
    }

    /// Statuses that become claimable once `run_after` has passed.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unknown status text read from storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "deadletter" => Ok(JobStatus::Deadletter),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A reply job as seen by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID (same as the inbound message ID)
    pub id: JobId,

    /// Conversation the inbound message belongs to
    pub conversation_id: ConversationId,

    /// Lifecycle status
    pub status: JobStatus,

    /// Failed attempts so far
    pub attempts: i32,

    /// Attempts allowed before dead-lettering
    pub max_attempts: i32,

    /// Earliest time the job may run
    pub run_after: DateTime<Utc>,

    /// Lease start, set only while processing
    pub locked_at: Option<DateTime<Utc>>,

    /// Lease owner, set only while processing
    pub locked_by: Option<String>,

    /// Error text from the last failed attempt
    pub last_error: Option<String>,

    /// Arrival time, used as the FIFO tiebreak
    pub received_at: DateTime<Utc>,
}

impl Job {
    /// Create a freshly queued job that is eligible immediately.
    pub fn queued(conversation_id: ConversationId, max_attempts: i32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            conversation_id,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            run_after: now,
            locked_at: None,
            locked_by: None,
            last_error: None,
            received_at: now,
        }
    }

    /// Check the lease invariant: lock fields are set iff the job is processing.
    pub fn lease_is_consistent(&self) -> bool {
        let locked = self.locked_at.is_some() && self.locked_by.is_some();
        let unlocked = self.locked_at.is_none() && self.locked_by.is_none();
        match self.status {
            JobStatus::Processing => locked,
            _ => unlocked,
        }
    }

    /// Whether the job can be claimed at `now`.
    ///
    /// Queued and failed jobs are eligible once `run_after` has passed. A
    /// processing job is eligible again once its lease is `stale_lock` old.
    pub fn is_claimable(&self, now: DateTime<Utc>, stale_lock: chrono::Duration) -> bool {
        match self.status {
            JobStatus::Queued | JobStatus::Failed => self.run_after <= now,
            JobStatus::Processing => self
                .locked_at
                .map(|locked_at| locked_at <= now - stale_lock)
                .unwrap_or(false),
            JobStatus::Succeeded | JobStatus::Deadletter => false,
        }
    }
}
