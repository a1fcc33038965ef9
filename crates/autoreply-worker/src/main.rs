//! Reply worker binary.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use autoreply_llm::LlmConfig;
use autoreply_queue::{BackoffPolicy, JobStore, MessageRepository, PgStore, QueueConfig};
use autoreply_worker::{
    metrics, BatchProcessor, ReplyGenerator, StaticReplyPolicy, TranscriptContextProvider,
    WorkerConfig, WorkerLoop, WorkerResult,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider");
        std::process::exit(1);
    }

    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("autoreply=info,sqlx=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting autoreply-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = match build_worker(config, shutdown_rx).await {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to start worker: {}", e);
            std::process::exit(1);
        }
    };

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    worker.run().await;

    info!("Worker shutdown complete");
}

/// Connect collaborators and assemble the loop.
async fn build_worker(
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
) -> WorkerResult<WorkerLoop> {
    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!(%addr, "Prometheus metrics listening");
    }

    let queue_config = QueueConfig::from_env()?;
    let store = PgStore::connect(&queue_config).await?;
    let db_now = store.ping().await?;
    info!(%db_now, "Database reachable");

    if config.run_migrations {
        store.migrate().await?;
        info!("Migrations applied");
    }

    let llm_config = LlmConfig::from_env()?;
    info!("LLM config: {:?}", llm_config);
    let backends = llm_config.build_backends()?;

    let store = Arc::new(store);
    let jobs: Arc<dyn JobStore> = store.clone();
    let messages: Arc<dyn MessageRepository> = store;

    let generator = ReplyGenerator::new(
        backends,
        Arc::new(StaticReplyPolicy::from_env()),
        config.model_timeout,
        config.max_reply_chars,
    );
    let context = Arc::new(TranscriptContextProvider::new(messages.clone()));
    let processor = BatchProcessor::new(jobs.clone(), messages, context, generator);

    Ok(WorkerLoop::new(
        config,
        jobs,
        processor,
        BackoffPolicy::from_env(),
        shutdown,
    ))
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
