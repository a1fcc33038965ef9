//! In-process store for tests and local runs.
//!
//! Mirrors the Postgres semantics: the single mutex plays the role of the
//! row locks, so a claimed job can never be handed to a second claimant
//! until its lease goes stale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use autoreply_models::{
    Conversation, ConversationId, Direction, InboundMessage, Job, JobId, JobStatus,
    NewOutboundMessage, OutboundId, OutboundMessage, OutboundStatus, TimelineEntry,
};

use crate::clock::{to_chrono, Clock, SystemClock};
use crate::error::{QueueError, QueueResult};
use crate::store::{truncate_error, JobStore, MessageRepository, WriteBackOutcome};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    inbound: HashMap<JobId, InboundMessage>,
    conversations: HashMap<ConversationId, Conversation>,
    outbound: Vec<OutboundMessage>,
    completed_at: HashMap<JobId, DateTime<Utc>>,
}

impl State {
    fn lease(&mut self, id: JobId, now: DateTime<Utc>, worker_id: &str) -> Option<Job> {
        let job = self.jobs.get_mut(&id)?;
        job.status = JobStatus::Processing;
        job.locked_at = Some(now);
        job.locked_by = Some(worker_id.to_string());
        Some(job.clone())
    }

    fn succeed(&mut self, job_ids: &[JobId], now: DateTime<Utc>) -> u64 {
        let mut changed = 0;
        for id in job_ids {
            let Some(job) = self.jobs.get_mut(id) else {
                continue;
            };
            if job.status.is_terminal() {
                continue;
            }
            job.status = JobStatus::Succeeded;
            job.locked_at = None;
            job.locked_by = None;
            job.last_error = None;
            self.completed_at.insert(*id, now);
            changed += 1;
        }
        changed
    }
}

/// In-memory `JobStore` and `MessageRepository`.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seed_conversation(&self, conversation: Conversation) {
        self.state()
            .conversations
            .insert(conversation.id, conversation);
    }

    /// Add a job together with its inbound message.
    pub fn enqueue(&self, job: Job, inbound: InboundMessage) {
        let mut state = self.state();
        state.inbound.insert(job.id, inbound);
        state.jobs.insert(job.id, job);
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.state().jobs.get(&id).cloned()
    }

    /// All jobs ordered by arrival.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.state().jobs.values().cloned().collect();
        jobs.sort_by_key(|job| (job.received_at, job.id));
        jobs
    }

    /// When a job was marked succeeded.
    pub fn completed_at(&self, id: JobId) -> Option<DateTime<Utc>> {
        self.state().completed_at.get(&id).copied()
    }

    /// Outbound rows in insertion order.
    pub fn outbound(&self) -> Vec<OutboundMessage> {
        self.state().outbound.clone()
    }

    /// Simulate the delivery side updating a row.
    pub fn set_outbound_status(&self, id: OutboundId, status: OutboundStatus) -> QueueResult<()> {
        let mut state = self.state();
        let row = state
            .outbound
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| QueueError::not_found(format!("outbound message {}", id)))?;
        row.status = status;
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn claim_batch(&self, stale_lock: Duration, worker_id: &str) -> QueueResult<Vec<Job>> {
        let now = self.clock.now();
        let stale = to_chrono(stale_lock);
        let mut state = self.state();

        let primary = state
            .jobs
            .values()
            .filter(|job| job.is_claimable(now, stale))
            .min_by_key(|job| (job.run_after, job.received_at, job.id))
            .map(|job| (job.id, job.conversation_id));

        let Some((primary_id, conversation_id)) = primary else {
            return Ok(Vec::new());
        };

        let mut siblings: Vec<(DateTime<Utc>, JobId)> = state
            .jobs
            .values()
            .filter(|job| {
                job.conversation_id == conversation_id
                    && job.id != primary_id
                    && job.is_claimable(now, stale)
            })
            .map(|job| (job.received_at, job.id))
            .collect();
        siblings.sort();

        let mut batch = Vec::with_capacity(siblings.len() + 1);
        batch.extend(state.lease(primary_id, now, worker_id));
        for (_, id) in siblings {
            batch.extend(state.lease(id, now, worker_id));
        }

        Ok(batch)
    }

    async fn mark_succeeded(&self, job_ids: &[JobId]) -> QueueResult<u64> {
        let now = self.clock.now();
        Ok(self.state().succeed(job_ids, now))
    }

    async fn mark_failed_or_deadletter(
        &self,
        job_ids: &[JobId],
        worker_id: &str,
        is_dead: bool,
        delay: Duration,
        last_error: &str,
    ) -> QueueResult<u64> {
        let now = self.clock.now();
        let last_error = truncate_error(last_error);
        let mut state = self.state();

        let mut changed = 0;
        for id in job_ids {
            let Some(job) = state.jobs.get_mut(id) else {
                continue;
            };
            if job.status.is_terminal() {
                continue;
            }
            if job.status == JobStatus::Processing
                && job.locked_by.as_deref() != Some(worker_id)
            {
                continue;
            }
            job.attempts = job.attempts.saturating_add(1);
            if is_dead {
                job.status = JobStatus::Deadletter;
            } else {
                job.status = JobStatus::Failed;
                job.run_after = now + to_chrono(delay);
            }
            job.locked_at = None;
            job.locked_by = None;
            job.last_error = Some(last_error.clone());
            changed += 1;
        }
        Ok(changed)
    }

    async fn write_back(
        &self,
        segments: &[NewOutboundMessage],
        job_ids: &[JobId],
    ) -> QueueResult<WriteBackOutcome> {
        let now = self.clock.now();
        let mut state = self.state();

        // Validate everything first so a failure leaves no partial writes.
        for segment in segments {
            if !state.inbound.contains_key(&segment.inbound_message_id) {
                return Err(QueueError::Database {
                    operation: "write_back".to_string(),
                    message: format!(
                        "inbound message {} does not exist",
                        segment.inbound_message_id
                    ),
                });
            }
        }

        let mut inserted = Vec::new();
        for segment in segments {
            let exists = state.outbound.iter().any(|row| {
                row.inbound_message_id == segment.inbound_message_id
                    && row.sequence_number == segment.sequence_number
            });
            if exists {
                continue;
            }
            let id = OutboundId::new();
            state
                .outbound
                .push(OutboundMessage::from_new(id, segment, now));
            inserted.push(id);
        }

        let succeeded = state.succeed(job_ids, now);
        Ok(WriteBackOutcome {
            inserted,
            succeeded,
        })
    }

    async fn close(&self) {}
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn inbound_message(&self, id: JobId) -> QueueResult<Option<InboundMessage>> {
        Ok(self.state().inbound.get(&id).cloned())
    }

    async fn conversation(&self, id: ConversationId) -> QueueResult<Option<Conversation>> {
        Ok(self.state().conversations.get(&id).cloned())
    }

    async fn timeline(
        &self,
        conversation_id: ConversationId,
        user_number: &str,
    ) -> QueueResult<Vec<TimelineEntry>> {
        let state = self.state();

        let inbound = state
            .inbound
            .values()
            .filter(|m| m.conversation_id == conversation_id && m.from_address == user_number)
            .filter_map(|m| {
                let job = state.jobs.get(&m.id)?;
                Some(TimelineEntry {
                    direction: Direction::Inbound,
                    body: m.body.clone(),
                    from_address: m.from_address.clone(),
                    to_address: m.to_address.clone(),
                    provider: m.provider.clone(),
                    at: job.received_at,
                })
            });

        let outbound = state
            .outbound
            .iter()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && m.to_address == user_number
                    && m.status.is_delivered_ish()
            })
            .map(|m| TimelineEntry {
                direction: Direction::Outbound,
                body: m.body.clone(),
                from_address: m.from_address.clone(),
                to_address: m.to_address.clone(),
                provider: m.provider.clone(),
                at: m.created_at,
            });

        let mut entries: Vec<TimelineEntry> = inbound.chain(outbound).collect();
        entries.sort_by_key(|e| e.at);
        Ok(entries)
    }
}
