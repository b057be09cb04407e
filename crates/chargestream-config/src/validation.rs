// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_broker_config(&config.broker)?;
    validate_database_config(&config.database)?;
    validate_queue_config(&config.queue)?;
    validate_server_config(&config.server)?;
    validate_analytics_config(&config.analytics)?;
    Ok(())
}

fn validate_broker_config(config: &BrokerConfig) -> Result<()> {
    if config.url.is_empty() {
        bail!("broker.url must not be empty");
    }
    if config.client_id.is_empty() {
        bail!("broker.client_id must not be empty");
    }
    if config.keep_alive_secs == 0 {
        bail!("broker.keep_alive_secs must be greater than 0");
    }
    Ok(())
}

fn validate_database_config(config: &DatabaseConfig) -> Result<()> {
    if config.url.is_empty() {
        bail!("database.url must not be empty");
    }
    if config.max_connections == 0 {
        bail!("database.max_connections must be greater than 0");
    }
    if config.statement_timeout_secs == 0 {
        bail!("database.statement_timeout_secs must be greater than 0");
    }
    if config.history_retention_months == 0 {
        bail!("database.history_retention_months must be greater than 0");
    }
    Ok(())
}

fn validate_queue_config(config: &QueueConfig) -> Result<()> {
    if config.batch_size == 0 {
        bail!("queue.batch_size must be greater than 0");
    }
    if config.flush_interval_ms == 0 {
        bail!("queue.flush_interval_ms must be greater than 0");
    }
    if config.poll_interval_ms == 0 {
        bail!("queue.poll_interval_ms must be greater than 0");
    }
    if config.max_attempts <= 0 {
        bail!("queue.max_attempts must be greater than 0");
    }
    if config.retry_backoff_cap_ms < config.retry_backoff_ms {
        bail!("queue.retry_backoff_cap_ms must be at least queue.retry_backoff_ms");
    }

    if config.batch_size > 50_000 {
        warn!(
            batch_size = config.batch_size,
            "queue.batch_size is very large; batch transactions may exceed the statement timeout"
        );
    }

    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.listen_addr.is_empty() {
        bail!("server.listen_addr must not be empty");
    }
    if !config.listen_addr.contains(':') {
        bail!("server.listen_addr must be in format 'host:port'");
    }
    Ok(())
}

fn validate_analytics_config(config: &AnalyticsConfig) -> Result<()> {
    if config.window_hours == 0 {
        bail!("analytics.window_hours must be greater than 0");
    }
    if config.snapshot_limit_cap <= 0 {
        bail!("analytics.snapshot_limit_cap must be greater than 0");
    }
    Ok(())
}
