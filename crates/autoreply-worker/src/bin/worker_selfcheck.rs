use autoreply_llm::LlmConfig;
use autoreply_queue::{PgStore, QueueConfig};
use autoreply_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = WorkerConfig::from_env();
    println!(
        "worker-selfcheck: starting with worker_id={}",
        config.worker_id
    );

    ensure_env_present(&["DATABASE_URL"])?;
    let llm = LlmConfig::from_env()?;
    println!(
        "worker-selfcheck: provider={} primary={} fallback={}",
        llm.provider, llm.primary_model, llm.fallback_model
    );

    ensure_database(&QueueConfig::from_env()?).await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_database(config: &QueueConfig) -> anyhow::Result<()> {
    let store = PgStore::connect(config)
        .await
        .map_err(|e| anyhow::anyhow!("database not reachable: {}", e))?;
    let now = store.ping().await?;
    println!("worker-selfcheck: database time {}", now);
    store.pool().close().await;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
