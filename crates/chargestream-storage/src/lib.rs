// chargestream-storage - Relational storage model
//
// Owns the Postgres schema (hot-state tables, partitioned history tables,
// session mapping), pool bootstrap, and partition maintenance. The durable
// queue tables live in chargestream-queue because they may sit on a
// separate endpoint.

use chargestream_config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

mod partitions;
mod sessions;

pub use partitions::{drop_partitions_before, ensure_monthly_partitions, HISTORY_TABLES};
pub use sessions::{ActiveSession, SessionError, SessionRecord, SessionStore};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connect a bounded pool with the configured statement deadline applied to
/// every connection.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let statement_timeout_ms = config.statement_timeout().as_millis() as u64;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("SET statement_timeout = {}", statement_timeout_ms))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&config.url)
        .await?;

    // Fail fast on an unreachable or misconfigured database
    sqlx::query("SELECT 1").execute(&pool).await?;

    info!(
        max_connections = config.max_connections,
        statement_timeout_ms, "Connected to Postgres"
    );

    Ok(pool)
}

/// Apply embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
