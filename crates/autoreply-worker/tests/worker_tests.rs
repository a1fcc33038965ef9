//! End-to-end worker tests against the in-memory store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use autoreply_llm::{Backends, LlmError, LlmResult, Prompt, ReplyBackend};
use autoreply_models::{Conversation, ConversationId, InboundMessage, Job, JobStatus};
use autoreply_queue::{BackoffPolicy, JobStore, ManualClock, MemoryStore, MessageRepository};
use autoreply_worker::{
    BatchProcessor, ReplyGenerator, StaticReplyPolicy, Tick, TranscriptContextProvider,
    WorkerConfig, WorkerLoop,
};

const USER: &str = "+15550001111";
const BUSINESS: &str = "+15559990000";

/// Backend that always answers the same way.
struct FixedBackend {
    model: String,
    reply: Result<&'static str, u16>,
    calls: AtomicU32,
}

impl FixedBackend {
    fn text(model: &str, reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            model: model.into(),
            reply: Ok(reply),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplyBackend for FixedBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> LlmResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!prompt.instructions.is_empty());
        match self.reply {
            Ok(text) => Ok(text.to_string()),
            Err(status) => Err(LlmError::from_http_status(status, "fixed")),
        }
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    start: DateTime<Utc>,
    conversation: ConversationId,
}

impl Fixture {
    fn new() -> Self {
        let start = Utc::now();
        let store = Arc::new(MemoryStore::with_clock(Arc::new(ManualClock::new(start))));
        let conversation = ConversationId::new();
        store.seed_conversation(Conversation {
            id: conversation,
            channel: "sms".into(),
            user_number: USER.into(),
        });
        Self {
            store,
            start,
            conversation,
        }
    }

    /// Enqueue an inbound message that arrived `age_secs` before the start.
    fn enqueue_in(&self, conversation: ConversationId, body: &str, age_secs: i64) -> Job {
        let at = self.start - chrono::Duration::seconds(age_secs);
        let mut job = Job::queued(conversation, 5);
        job.received_at = at;
        job.run_after = at;
        self.store.enqueue(
            job.clone(),
            InboundMessage {
                id: job.id,
                conversation_id: conversation,
                body: body.into(),
                from_address: USER.into(),
                to_address: BUSINESS.into(),
                provider: "twilio".into(),
                provider_message_sid: format!("SM-{}", job.id),
            },
        );
        job
    }

    fn enqueue(&self, body: &str, age_secs: i64) -> Job {
        self.enqueue_in(self.conversation, body, age_secs)
    }

    fn worker(
        &self,
        primary: Arc<FixedBackend>,
        shutdown: watch::Receiver<bool>,
    ) -> WorkerLoop {
        let jobs: Arc<dyn JobStore> = self.store.clone();
        let messages: Arc<dyn MessageRepository> = self.store.clone();
        let generator = ReplyGenerator::new(
            Backends {
                primary,
                fallback: FixedBackend::text("gpt-5-mini", "from fallback"),
            },
            Arc::new(StaticReplyPolicy::default()),
            Duration::from_secs(35),
            1200,
        );
        let context = Arc::new(TranscriptContextProvider::new(messages.clone()));
        let processor = BatchProcessor::new(jobs.clone(), messages, context, generator);

        let config = WorkerConfig {
            worker_id: "worker-test".into(),
            poll_interval: Duration::from_millis(20),
            ..WorkerConfig::default()
        };

        WorkerLoop::new(config, jobs, processor, BackoffPolicy::default(), shutdown)
    }
}

#[tokio::test]
async fn test_two_inbound_messages_get_one_split_reply() {
    let fx = Fixture::new();
    let j1 = fx.enqueue("yo", 10);
    let j2 = fx.enqueue("you there?", 5);
    let primary = FixedBackend::text("gpt-5", "hey\t\nwhat's good");
    let (_tx, rx) = watch::channel(false);
    let worker = fx.worker(primary.clone(), rx);

    assert_eq!(worker.tick().await.unwrap(), Tick::Processed { batch_size: 2 });
    assert_eq!(primary.calls(), 1);

    let outbound = fx.store.outbound();
    assert_eq!(outbound.len(), 2);
    assert_eq!(outbound[0].body, "hey");
    assert_eq!(outbound[0].sequence_number, 0);
    assert_eq!(outbound[1].body, "what's good");
    assert_eq!(outbound[1].sequence_number, 1);
    for row in &outbound {
        assert_eq!(row.inbound_message_id, j2.id);
        assert_eq!(row.to_address, USER);
        assert_eq!(row.from_address, BUSINESS);
        assert_eq!(row.provider_inbound_sid, Some(format!("SM-{}", j2.id)));
    }

    for job in [&j1, &j2] {
        let stored = fx.store.job(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert!(stored.lease_is_consistent());
        assert!(fx.store.completed_at(job.id).is_some());
    }

    assert_eq!(worker.tick().await.unwrap(), Tick::Idle);
}

#[tokio::test]
async fn test_reply_goes_to_newest_message_when_older_was_rescheduled() {
    let fx = Fixture::new();
    let mut old = fx.enqueue("anyone?", 30);
    old.status = JobStatus::Failed;
    old.attempts = 1;
    old.run_after = fx.start - chrono::Duration::seconds(1);
    fx.store.enqueue(
        old.clone(),
        InboundMessage {
            id: old.id,
            conversation_id: fx.conversation,
            body: "anyone?".into(),
            from_address: USER.into(),
            to_address: BUSINESS.into(),
            provider: "twilio".into(),
            provider_message_sid: format!("SM-{}", old.id),
        },
    );
    let new = fx.enqueue("hello??", 10);
    let (_tx, rx) = watch::channel(false);
    let worker = fx.worker(FixedBackend::text("gpt-5", "here now"), rx);

    assert_eq!(worker.tick().await.unwrap(), Tick::Processed { batch_size: 2 });

    let outbound = fx.store.outbound();
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].inbound_message_id, new.id);
    assert_eq!(outbound[0].provider_inbound_sid, Some(format!("SM-{}", new.id)));
    for job in [&old, &new] {
        assert_eq!(fx.store.job(job.id).unwrap().status, JobStatus::Succeeded);
    }
}

#[tokio::test]
async fn test_sentinel_reply_succeeds_without_outbound() {
    let fx = Fixture::new();
    let job = fx.enqueue("ok bye", 5);
    let (_tx, rx) = watch::channel(false);
    let worker = fx.worker(FixedBackend::text("gpt-5", "[NO_REPLY]"), rx);

    assert_eq!(worker.tick().await.unwrap(), Tick::Processed { batch_size: 1 });

    assert!(fx.store.outbound().is_empty());
    assert_eq!(fx.store.job(job.id).unwrap().status, JobStatus::Succeeded);
}

#[tokio::test]
async fn test_terminal_model_error_sends_degraded_reply() {
    let fx = Fixture::new();
    let job = fx.enqueue("hello?", 5);
    let primary = Arc::new(FixedBackend {
        model: "gpt-5".into(),
        reply: Err(400),
        calls: AtomicU32::new(0),
    });
    let (_tx, rx) = watch::channel(false);
    let worker = fx.worker(primary, rx);

    worker.tick().await.unwrap();

    let outbound = fx.store.outbound();
    assert_eq!(outbound.len(), 1);
    assert_eq!(
        outbound[0].body,
        "I'm a bit jammed up right now, try again in a minute."
    );
    assert_eq!(fx.store.job(job.id).unwrap().status, JobStatus::Succeeded);
}

#[tokio::test]
async fn test_failed_batch_is_scheduled_for_retry() {
    let fx = Fixture::new();
    let orphan = ConversationId::new();
    let job = fx.enqueue_in(orphan, "hi", 5);
    let primary = FixedBackend::text("gpt-5", "unused");
    let (_tx, rx) = watch::channel(false);
    let worker = fx.worker(primary.clone(), rx);

    assert_eq!(worker.tick().await.unwrap(), Tick::Processed { batch_size: 1 });
    assert_eq!(primary.calls(), 0);

    let stored = fx.store.job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.run_after, fx.start + chrono::Duration::seconds(15));
    assert!(stored.last_error.as_ref().unwrap().contains(&orphan.to_string()));
    assert!(stored.lease_is_consistent());
    assert!(fx.store.outbound().is_empty());
}

#[tokio::test]
async fn test_failed_batch_groups_by_disposition() {
    let fx = Fixture::new();
    let orphan = ConversationId::new();
    let mut tired = fx.enqueue_in(orphan, "first", 20);
    tired.attempts = 4;
    tired.status = JobStatus::Failed;
    fx.store.enqueue(
        tired.clone(),
        InboundMessage {
            id: tired.id,
            conversation_id: orphan,
            body: "first".into(),
            from_address: USER.into(),
            to_address: BUSINESS.into(),
            provider: "twilio".into(),
            provider_message_sid: "SM-first".into(),
        },
    );
    let fresh = fx.enqueue_in(orphan, "second", 10);
    let (_tx, rx) = watch::channel(false);
    let worker = fx.worker(FixedBackend::text("gpt-5", "unused"), rx);

    assert_eq!(worker.tick().await.unwrap(), Tick::Processed { batch_size: 2 });

    let tired = fx.store.job(tired.id).unwrap();
    assert_eq!(tired.status, JobStatus::Deadletter);
    assert_eq!(tired.attempts, 5);

    let fresh = fx.store.job(fresh.id).unwrap();
    assert_eq!(fresh.status, JobStatus::Failed);
    assert_eq!(fresh.attempts, 1);
    assert_eq!(fresh.run_after, fx.start + chrono::Duration::seconds(15));
}

#[tokio::test]
async fn test_loop_stops_on_shutdown_and_skips_claims() {
    let fx = Fixture::new();
    let job = fx.enqueue("hi", 5);
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let primary = FixedBackend::text("gpt-5", "hey");
    let worker = fx.worker(primary.clone(), rx);

    tokio::time::timeout(Duration::from_secs(5), worker.run())
        .await
        .expect("worker should stop immediately");

    assert_eq!(primary.calls(), 0);
    assert_eq!(fx.store.job(job.id).unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn test_loop_processes_then_shuts_down() {
    let fx = Fixture::new();
    let job = fx.enqueue("hi", 5);
    let (tx, rx) = watch::channel(false);
    let worker = fx.worker(FixedBackend::text("gpt-5", "hey there"), rx);

    let handle = tokio::spawn(worker.run());

    let store = fx.store.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while store.job(job.id).map(|j| j.status) != Some(JobStatus::Succeeded) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should succeed");

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker should stop after shutdown")
        .unwrap();

    assert_eq!(fx.store.outbound().len(), 1);
    assert_eq!(fx.store.outbound()[0].body, "hey there");
}
