//! Postgres integration tests.
//!
//! These truncate the queue tables, so point `DATABASE_URL` at a scratch
//! database.

use std::collections::HashSet;
use std::time::Duration;

use serial_test::serial;
use uuid::Uuid;

use autoreply_models::{ConversationId, JobId, JobStatus, NewOutboundMessage};
use autoreply_queue::{JobStore, MessageRepository, PgStore, QueueConfig};

const STALE: Duration = Duration::from_secs(120);

async fn store() -> PgStore {
    dotenvy::dotenv().ok();
    let config = QueueConfig::from_env().expect("DATABASE_URL must be set");
    let store = PgStore::connect(&config)
        .await
        .expect("Failed to connect to Postgres");
    store.migrate().await.expect("Failed to run migrations");

    sqlx::query("TRUNCATE outbound_messages, inbound_messages, conversations")
        .execute(store.pool())
        .await
        .expect("Failed to truncate tables");

    store
}

async fn conversation(store: &PgStore, user_number: &str) -> ConversationId {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO conversations (channel, user_number) VALUES ('sms', $1) RETURNING id",
    )
    .bind(user_number)
    .fetch_one(store.pool())
    .await
    .expect("Failed to insert conversation");
    ConversationId(id)
}

/// Insert an inbound message that arrived `age_secs` ago.
async fn inbound(store: &PgStore, conversation_id: ConversationId, age_secs: f64) -> JobId {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO inbound_messages (
            conversation_id, body, from_address, to_address, provider,
            provider_message_sid, received_at, run_after
        )
        VALUES ($1, 'hello', '+15550001111', '+15559990000', 'twilio', $2,
                now() - make_interval(secs => $3), now() - make_interval(secs => $3))
        RETURNING id
        "#,
    )
    .bind(conversation_id.as_uuid())
    .bind(format!("SM{}", Uuid::new_v4().simple()))
    .bind(age_secs)
    .fetch_one(store.pool())
    .await
    .expect("Failed to insert inbound message");
    JobId(id)
}

async fn status(store: &PgStore, id: JobId) -> (String, i32, Option<String>) {
    sqlx::query_as("SELECT status, attempts, locked_by FROM inbound_messages WHERE id = $1")
        .bind(id.as_uuid())
        .fetch_one(store.pool())
        .await
        .expect("Failed to read job")
}

#[tokio::test]
#[ignore = "requires Postgres"]
#[serial]
async fn test_claim_batch_groups_conversation() {
    let store = store().await;
    let convo = conversation(&store, "+15550001111").await;
    let other = conversation(&store, "+15550002222").await;

    let j1 = inbound(&store, convo, 30.0).await;
    let j2 = inbound(&store, convo, 20.0).await;
    let j3 = inbound(&store, convo, 10.0).await;
    let unrelated = inbound(&store, other, 5.0).await;

    let batch = store.claim_batch(STALE, "worker-a").await.unwrap();
    let ids: Vec<JobId> = batch.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![j1, j2, j3]);
    assert!(batch.iter().all(|j| j.status == JobStatus::Processing));
    assert!(batch.iter().all(|j| j.lease_is_consistent()));

    let (unrelated_status, _, _) = status(&store, unrelated).await;
    assert_eq!(unrelated_status, "queued");

    store.close().await;
}

#[tokio::test]
#[ignore = "requires Postgres"]
#[serial]
async fn test_concurrent_claimants_never_share_a_job() {
    let store = store().await;
    let mut expected = HashSet::new();
    for i in 0..20 {
        let convo = conversation(&store, &format!("+1555000{:04}", i)).await;
        expected.insert(inbound(&store, convo, 1.0).await);
        expected.insert(inbound(&store, convo, 0.5).await);
    }

    let mut handles = Vec::new();
    for w in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let worker = format!("worker-{}", w);
            let mut claimed = Vec::new();
            loop {
                let batch = store.claim_batch(STALE, &worker).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|j| j.id));
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "job {} claimed twice", id);
        }
    }
    assert_eq!(seen, expected);

    store.close().await;
}

#[tokio::test]
#[ignore = "requires Postgres"]
#[serial]
async fn test_failure_then_deadletter() {
    let store = store().await;
    let convo = conversation(&store, "+15550001111").await;
    let job = inbound(&store, convo, 1.0).await;

    store.claim_batch(STALE, "worker-a").await.unwrap();
    let changed = store
        .mark_failed_or_deadletter(
            &[job],
            "worker-a",
            false,
            Duration::from_secs(15),
            "timeout",
        )
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let (s, attempts, locked_by) = status(&store, job).await;
    assert_eq!((s.as_str(), attempts, locked_by), ("failed", 1, None));

    // Not eligible until run_after passes.
    assert!(store.claim_batch(STALE, "worker-a").await.unwrap().is_empty());

    store
        .mark_failed_or_deadletter(&[job], "worker-a", true, Duration::ZERO, "gave up")
        .await
        .unwrap();
    let (s, attempts, _) = status(&store, job).await;
    assert_eq!((s.as_str(), attempts), ("deadletter", 2));

    // Terminal rows are left alone.
    assert_eq!(store.mark_succeeded(&[job]).await.unwrap(), 0);

    store.close().await;
}

#[tokio::test]
#[ignore = "requires Postgres"]
#[serial]
async fn test_failure_leaves_foreign_lease_alone() {
    let store = store().await;
    let convo = conversation(&store, "+15550001111").await;
    let job = inbound(&store, convo, 1.0).await;
    store.claim_batch(STALE, "worker-a").await.unwrap();

    sqlx::query("UPDATE inbound_messages SET locked_at = now() - interval '121 seconds'")
        .execute(store.pool())
        .await
        .unwrap();
    assert_eq!(store.claim_batch(STALE, "worker-b").await.unwrap().len(), 1);

    let changed = store
        .mark_failed_or_deadletter(
            &[job],
            "worker-a",
            false,
            Duration::from_secs(15),
            "timeout",
        )
        .await
        .unwrap();
    assert_eq!(changed, 0);

    let (s, attempts, locked_by) = status(&store, job).await;
    assert_eq!(
        (s.as_str(), attempts, locked_by.as_deref()),
        ("processing", 0, Some("worker-b"))
    );

    store.close().await;
}

#[tokio::test]
#[ignore = "requires Postgres"]
#[serial]
async fn test_write_back_is_idempotent() {
    let store = store().await;
    let convo = conversation(&store, "+15550001111").await;
    let job = inbound(&store, convo, 1.0).await;
    store.claim_batch(STALE, "worker-a").await.unwrap();

    let segments: Vec<NewOutboundMessage> = (0..2)
        .map(|seq| NewOutboundMessage {
            conversation_id: convo,
            inbound_message_id: job,
            provider: "twilio".into(),
            to_address: "+15550001111".into(),
            from_address: "+15559990000".into(),
            body: format!("segment {}", seq),
            provider_inbound_sid: None,
            sequence_number: seq,
        })
        .collect();

    let first = store.write_back(&segments, &[job]).await.unwrap();
    assert_eq!(first.inserted.len(), 2);
    assert_eq!(first.succeeded, 1);

    let second = store.write_back(&segments, &[job]).await.unwrap();
    assert!(second.inserted.is_empty());
    assert_eq!(second.succeeded, 0);

    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM outbound_messages")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 2);

    let inbound = store.inbound_message(job).await.unwrap().unwrap();
    assert_eq!(inbound.conversation_id, convo);

    store.close().await;
}
