// Initialization: logging, storage, durable queue

use anyhow::{Context, Result};
use chargestream_config::{DatabaseConfig, LogFormat, RuntimeConfig};
use chargestream_queue::DurableQueue;
use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

/// Connect the main pool, apply migrations, provision history partitions.
pub(crate) async fn init_storage(config: &RuntimeConfig) -> Result<PgPool> {
    let pool = chargestream_storage::connect_pool(&config.database)
        .await
        .context("Failed to connect to the database")?;

    chargestream_storage::run_migrations(&pool)
        .await
        .context("Failed to apply schema migrations")?;

    chargestream_storage::ensure_monthly_partitions(&pool, Utc::now(), 1)
        .await
        .context("Failed to provision history partitions")?;

    Ok(pool)
}

/// Build the durable queue, on its own endpoint when one is configured.
pub(crate) async fn init_queue(config: &RuntimeConfig, primary: &PgPool) -> Result<DurableQueue> {
    let queue = match &config.queue.database_url {
        Some(url) => {
            info!("Durable queue on separate endpoint");
            let queue_db = DatabaseConfig {
                url: url.clone(),
                ..config.database.clone()
            };
            let pool = chargestream_storage::connect_pool(&queue_db)
                .await
                .context("Failed to connect to the queue database")?;
            DurableQueue::new(pool, false)
        }
        None => DurableQueue::new(primary.clone(), true),
    };

    queue
        .ensure_schema()
        .await
        .context("Failed to provision queue tables")?;

    Ok(queue)
}

/// Initialize tracing/logging from RuntimeConfig
pub(crate) fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.server.log_format {
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
        LogFormat::Text => {
            registry.with(fmt::layer()).init();
        }
    }
}
