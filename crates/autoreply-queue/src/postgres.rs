//! PostgreSQL-backed job store.
//!
//! The job table is `inbound_messages`. Claims use `FOR UPDATE SKIP LOCKED`
//! so concurrent workers never block on, or double-claim, the same row. All
//! timestamps come from the database clock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use autoreply_models::{
    Conversation, ConversationId, Direction, InboundMessage, Job, JobId, JobStatus,
    NewOutboundMessage, OutboundId, TimelineEntry,
};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::store::{truncate_error, JobStore, MessageRepository, WriteBackOutcome};

const JOB_COLUMNS: &str = "m.id, m.conversation_id, m.status, m.attempts, m.max_attempts, \
     m.run_after, m.locked_at, m.locked_by, m.last_error, m.received_at";

/// Postgres `JobStore` and `MessageRepository`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a connection pool.
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        info!(
            max_connections = config.max_connections,
            "Connected to Postgres"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip to the database; returns the server clock.
    pub async fn ping(&self) -> QueueResult<DateTime<Utc>> {
        sqlx::query_scalar::<_, DateTime<Utc>>("SELECT now()")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> QueueResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn claim_batch(&self, stale_lock: Duration, worker_id: &str) -> QueueResult<Vec<Job>> {
        let stale_secs = stale_lock.as_secs_f64();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("claim_batch.begin", e))?;

        let primary_sql = format!(
            r#"
            WITH candidate AS (
                SELECT id
                FROM inbound_messages
                WHERE (status IN ('queued', 'failed') AND run_after <= now())
                   OR (status = 'processing'
                       AND locked_at <= now() - make_interval(secs => $1::float8))
                ORDER BY run_after ASC, received_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE inbound_messages m
            SET status = 'processing',
                locked_at = now(),
                locked_by = $2
            FROM candidate
            WHERE m.id = candidate.id
            RETURNING {JOB_COLUMNS}
            "#
        );

        let primary = sqlx::query_as::<_, JobRow>(&primary_sql)
            .bind(stale_secs)
            .bind(worker_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_batch.primary", e))?;

        let Some(primary) = primary else {
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("claim_batch.commit", e))?;
            return Ok(Vec::new());
        };
        let primary = Job::try_from(primary)?;

        // Siblings are only taken while this worker still holds the primary.
        let siblings_sql = format!(
            r#"
            WITH owner AS (
                SELECT 1
                FROM inbound_messages
                WHERE id = $1 AND status = 'processing' AND locked_by = $3
            ),
            candidates AS (
                SELECT id
                FROM inbound_messages
                WHERE conversation_id = $2
                  AND id <> $1
                  AND EXISTS (SELECT 1 FROM owner)
                  AND ((status IN ('queued', 'failed') AND run_after <= now())
                    OR (status = 'processing'
                        AND locked_at <= now() - make_interval(secs => $4::float8)))
                FOR UPDATE SKIP LOCKED
            )
            UPDATE inbound_messages m
            SET status = 'processing',
                locked_at = now(),
                locked_by = $3
            FROM candidates
            WHERE m.id = candidates.id
            RETURNING {JOB_COLUMNS}
            "#
        );

        let sibling_rows = sqlx::query_as::<_, JobRow>(&siblings_sql)
            .bind(primary.id.as_uuid())
            .bind(primary.conversation_id.as_uuid())
            .bind(worker_id)
            .bind(stale_secs)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_batch.siblings", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("claim_batch.commit", e))?;

        let mut rest = sibling_rows
            .into_iter()
            .map(Job::try_from)
            .collect::<QueueResult<Vec<_>>>()?;
        rest.sort_by_key(|job| (job.received_at, job.id));

        let mut batch = Vec::with_capacity(rest.len() + 1);
        batch.push(primary);
        batch.extend(rest);

        debug!(
            worker_id = %worker_id,
            conversation_id = %batch[0].conversation_id,
            batch_size = batch.len(),
            "Claimed job batch"
        );

        Ok(batch)
    }

    async fn mark_succeeded(&self, job_ids: &[JobId]) -> QueueResult<u64> {
        mark_succeeded_with(&self.pool, job_ids)
            .await
            .map_err(|e| map_sqlx_error("mark_succeeded", e))
    }

    async fn mark_failed_or_deadletter(
        &self,
        job_ids: &[JobId],
        worker_id: &str,
        is_dead: bool,
        delay: Duration,
        last_error: &str,
    ) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE inbound_messages
            SET attempts = attempts + 1,
                status = CASE WHEN $2::boolean THEN 'deadletter' ELSE 'failed' END,
                run_after = CASE
                    WHEN $2::boolean THEN run_after
                    ELSE now() + make_interval(secs => $3::float8)
                END,
                locked_at = NULL,
                locked_by = NULL,
                last_error = $4
            WHERE id = ANY($1)
              AND status NOT IN ('succeeded', 'deadletter')
              AND (status <> 'processing' OR locked_by = $5)
            "#,
        )
        .bind(uuids(job_ids))
        .bind(is_dead)
        .bind(delay.as_secs_f64())
        .bind(truncate_error(last_error))
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_failed_or_deadletter", e))?;

        Ok(result.rows_affected())
    }

    async fn write_back(
        &self,
        segments: &[NewOutboundMessage],
        job_ids: &[JobId],
    ) -> QueueResult<WriteBackOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("write_back.begin", e))?;

        let mut inserted = Vec::with_capacity(segments.len());
        for segment in segments {
            let id = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO outbound_messages (
                    conversation_id, inbound_message_id, provider, to_address,
                    from_address, body, status, provider_inbound_sid, sequence_number
                )
                VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8)
                ON CONFLICT (inbound_message_id, sequence_number) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(segment.conversation_id.as_uuid())
            .bind(segment.inbound_message_id.as_uuid())
            .bind(&segment.provider)
            .bind(&segment.to_address)
            .bind(&segment.from_address)
            .bind(&segment.body)
            .bind(&segment.provider_inbound_sid)
            .bind(segment.sequence_number)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("write_back.insert", e))?;

            if let Some(id) = id {
                inserted.push(OutboundId(id));
            }
        }

        let succeeded = mark_succeeded_with(&mut *tx, job_ids)
            .await
            .map_err(|e| map_sqlx_error("write_back.mark_succeeded", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("write_back.commit", e))?;

        Ok(WriteBackOutcome {
            inserted,
            succeeded,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Postgres pool drained");
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn inbound_message(&self, id: JobId) -> QueueResult<Option<InboundMessage>> {
        let row = sqlx::query_as::<_, InboundRow>(
            r#"
            SELECT id, conversation_id, body, from_address, to_address, provider,
                   provider_message_sid
            FROM inbound_messages
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("inbound_message", e))?;

        Ok(row.map(InboundMessage::from))
    }

    async fn conversation(&self, id: ConversationId) -> QueueResult<Option<Conversation>> {
        let row = sqlx::query("SELECT id, channel, user_number FROM conversations WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("conversation", e))?;

        row.map(|row| -> Result<Conversation, sqlx::Error> {
            Ok(Conversation {
                id: ConversationId(row.try_get("id")?),
                channel: row.try_get("channel")?,
                user_number: row.try_get("user_number")?,
            })
        })
        .transpose()
        .map_err(|e| map_sqlx_error("conversation", e))
    }

    async fn timeline(
        &self,
        conversation_id: ConversationId,
        user_number: &str,
    ) -> QueueResult<Vec<TimelineEntry>> {
        let rows = sqlx::query_as::<_, TimelineRow>(
            r#"
            SELECT 'inbound' AS direction, body, from_address, to_address, provider,
                   received_at AS at
            FROM inbound_messages
            WHERE conversation_id = $1 AND from_address = $2
            UNION ALL
            SELECT 'outbound' AS direction, body, from_address, to_address, provider,
                   created_at AS at
            FROM outbound_messages
            WHERE conversation_id = $1
              AND to_address = $2
              AND status IN ('sent', 'sending')
            ORDER BY at ASC
            "#,
        )
        .bind(conversation_id.as_uuid())
        .bind(user_number)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("timeline", e))?;

        rows.into_iter().map(TimelineEntry::try_from).collect()
    }
}

async fn mark_succeeded_with<'e, E>(executor: E, job_ids: &[JobId]) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE inbound_messages
        SET status = 'succeeded',
            locked_at = NULL,
            locked_by = NULL,
            last_error = NULL,
            inferenced_at = now()
        WHERE id = ANY($1)
          AND status NOT IN ('succeeded', 'deadletter')
        "#,
    )
    .bind(uuids(job_ids))
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

fn uuids(job_ids: &[JobId]) -> Vec<Uuid> {
    job_ids.iter().map(JobId::as_uuid).collect()
}

/// Map sqlx errors onto the queue taxonomy.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => QueueError::Conflict {
                    operation: operation.to_string(),
                    message,
                },
                // Admin shutdown, crash shutdown, cannot connect now
                Some("57P01") | Some("57P02") | Some("57P03") => {
                    QueueError::Unavailable(format!("{} in {}", message, operation))
                }
                _ => QueueError::Database {
                    operation: operation.to_string(),
                    message,
                },
            }
        }
        sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => QueueError::Unavailable(format!("{} in {}", err, operation)),
        sqlx::Error::RowNotFound => {
            QueueError::not_found(format!("unexpected missing row in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => QueueError::decode(format!("{} in {}", err, operation)),
        other => QueueError::Database {
            operation: operation.to_string(),
            message: other.to_string(),
        },
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    conversation_id: Uuid,
    status: String,
    attempts: i32,
    max_attempts: i32,
    run_after: DateTime<Utc>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    last_error: Option<String>,
    received_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            run_after: row.try_get("run_after")?,
            locked_at: row.try_get("locked_at")?,
            locked_by: row.try_get("locked_by")?,
            last_error: row.try_get("last_error")?,
            received_at: row.try_get("received_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e| QueueError::decode(format!("job {}: {}", row.id, e)))?;

        Ok(Job {
            id: JobId(row.id),
            conversation_id: ConversationId(row.conversation_id),
            status,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            run_after: row.run_after,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
            last_error: row.last_error,
            received_at: row.received_at,
        })
    }
}

#[derive(Debug)]
struct InboundRow {
    id: Uuid,
    conversation_id: Uuid,
    body: String,
    from_address: String,
    to_address: String,
    provider: String,
    provider_message_sid: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for InboundRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            body: row.try_get("body")?,
            from_address: row.try_get("from_address")?,
            to_address: row.try_get("to_address")?,
            provider: row.try_get("provider")?,
            provider_message_sid: row.try_get("provider_message_sid")?,
        })
    }
}

impl From<InboundRow> for InboundMessage {
    fn from(row: InboundRow) -> Self {
        Self {
            id: JobId(row.id),
            conversation_id: ConversationId(row.conversation_id),
            body: row.body,
            from_address: row.from_address,
            to_address: row.to_address,
            provider: row.provider,
            provider_message_sid: row.provider_message_sid,
        }
    }
}

#[derive(Debug)]
struct TimelineRow {
    direction: String,
    body: String,
    from_address: String,
    to_address: String,
    provider: String,
    at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for TimelineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            direction: row.try_get("direction")?,
            body: row.try_get("body")?,
            from_address: row.try_get("from_address")?,
            to_address: row.try_get("to_address")?,
            provider: row.try_get("provider")?,
            at: row.try_get("at")?,
        })
    }
}

impl TryFrom<TimelineRow> for TimelineEntry {
    type Error = QueueError;

    fn try_from(row: TimelineRow) -> Result<Self, Self::Error> {
        let direction = match row.direction.as_str() {
            "inbound" => Direction::Inbound,
            "outbound" => Direction::Outbound,
            other => return Err(QueueError::decode(format!("unknown direction: {}", other))),
        };

        Ok(TimelineEntry {
            direction,
            body: row.body,
            from_address: row.from_address,
            to_address: row.to_address,
            provider: row.provider,
            at: row.at,
        })
    }
}
