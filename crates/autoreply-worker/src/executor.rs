//! Worker loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use autoreply_models::{Job, JobId};
use autoreply_queue::{BackoffPolicy, FailureDisposition, JobStore};
use tokio::sync::watch;
use tracing::{error, info, Instrument};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::BatchLogger;
use crate::metrics;
use crate::processor::BatchProcessor;
use crate::retry::FailureTracker;

/// Result of one claim-and-process iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing was eligible
    Idle,
    /// A batch was claimed and either succeeded or was marked failed
    Processed { batch_size: usize },
}

/// Polls the store for batches and processes them one at a time.
pub struct WorkerLoop {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    processor: BatchProcessor,
    backoff: BackoffPolicy,
    shutdown: watch::Receiver<bool>,
    failures: FailureTracker,
}

impl WorkerLoop {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        processor: BatchProcessor,
        backoff: BackoffPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            store,
            processor,
            backoff,
            shutdown,
            failures: FailureTracker::new(5),
        }
    }

    /// Run until shutdown is signalled, then drain the store.
    ///
    /// Shutdown is checked before every claim and interrupts every sleep;
    /// a batch already claimed always runs to completion.
    pub async fn run(mut self) {
        info!(
            worker_id = %self.config.worker_id,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            stale_lock_secs = self.config.stale_lock.as_secs(),
            "Reply worker started"
        );

        loop {
            if self.shutdown_requested() {
                info!("Shutdown signal received, stopping worker");
                break;
            }

            let pause = match self.tick().await {
                Ok(Tick::Processed { .. }) => {
                    self.failures.record_success();
                    None
                }
                Ok(Tick::Idle) => {
                    self.failures.record_success();
                    Some(self.config.poll_interval)
                }
                Err(e) => {
                    metrics::record_loop_error();
                    if self.failures.record_failure() {
                        error!(
                            worker_id = %self.config.worker_id,
                            consecutive = self.failures.failure_count(),
                            "Worker loop error: {}", e
                        );
                    }
                    Some(self.config.loop_error_cooldown())
                }
            };

            if let Some(delay) = pause {
                if self.sleep_or_shutdown(delay).await {
                    info!("Shutdown signal received, stopping worker");
                    break;
                }
            }
        }

        info!("Draining store connections...");
        self.store.close().await;
        info!(worker_id = %self.config.worker_id, "Reply worker stopped");
    }

    /// Claim one batch and process it.
    ///
    /// Only claim errors propagate; a failed batch is recorded on the jobs
    /// and reported as processed.
    pub async fn tick(&self) -> WorkerResult<Tick> {
        let batch = self
            .store
            .claim_batch(self.config.stale_lock, &self.config.worker_id)
            .await?;

        if batch.is_empty() {
            return Ok(Tick::Idle);
        }

        metrics::record_claimed(batch.len());
        let logger = BatchLogger::new(&self.config.worker_id, &batch);
        logger.log_claimed();

        let started = Instant::now();
        let result = self
            .processor
            .process(&batch)
            .instrument(logger.create_span())
            .await;

        match result {
            Ok(outcome) => {
                logger.log_outcome(&outcome);
                metrics::record_batch_duration("succeeded", started.elapsed().as_secs_f64());
            }
            Err(e) => {
                logger.log_failure(&e.to_string());
                self.fail_batch(&batch, &e, &logger).await;
                metrics::record_batch_duration("failed", started.elapsed().as_secs_f64());
            }
        }

        Ok(Tick::Processed {
            batch_size: batch.len(),
        })
    }

    /// Record `error` on every job of the batch.
    ///
    /// Jobs with the same disposition share one store call. A store failure
    /// here is logged and the batch is left for lease expiry to reclaim.
    async fn fail_batch(&self, batch: &[Job], error: &WorkerError, logger: &BatchLogger) {
        let mut groups: HashMap<FailureDisposition, Vec<JobId>> = HashMap::new();
        for job in batch {
            groups.entry(self.backoff.plan(job)).or_default().push(job.id);
        }

        let last_error = error.to_string();
        for (disposition, job_ids) in groups {
            let label = if disposition.is_dead { "deadletter" } else { "failed" };
            match self
                .store
                .mark_failed_or_deadletter(
                    &job_ids,
                    &self.config.worker_id,
                    disposition.is_dead,
                    disposition.delay,
                    &last_error,
                )
                .await
            {
                Ok(count) => {
                    metrics::record_failed(label, count);
                    logger.log_marked(label, count, disposition.attempts_after);
                }
                Err(e) => {
                    logger.log_error(&format!(
                        "Failed to mark {} job(s) {}, leaving for lease reclaim: {}",
                        job_ids.len(),
                        label,
                        e
                    ));
                }
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `delay`. Returns `true` if shutdown arrived first.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            changed = self.shutdown.changed() => {
                changed.is_err() || *self.shutdown.borrow()
            }
        }
    }
}
