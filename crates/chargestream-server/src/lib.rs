// chargestream-server - HTTP surface and process wiring
//
// The binary's real work happens here: connect storage, start the intake
// adapter and the two single-flight batch workers, and serve the thin HTTP
// surface (analytics, fleet snapshot, operator session APIs, health).
//
// Shutdown is graceful: the intake stops accepting deliveries, each worker
// finishes its in-flight batch, and the queue keeps the remainder for the
// next startup.

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chargestream_analytics::Aggregator;
use chargestream_config::RuntimeConfig;
use chargestream_core::Stream;
use chargestream_intake::IntakeAdapter;
use chargestream_queue::{BatchWorker, WorkerConfig};
use chargestream_storage::SessionStore;
use chargestream_writer::IngestWriter;
use chrono::{Months, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod handlers;
mod init;

use handlers::{
    delete_session, end_sessions_bulk, get_performance, get_vehicle_states, health_check,
    post_session, start_sessions_bulk, ready_check,
};
use init::{init_queue, init_storage, init_tracing};

/// Application state shared across all requests
#[derive(Clone)]
pub(crate) struct AppState {
    pub aggregator: Aggregator,
    pub sessions: SessionStore,
    pub pool: PgPool,
}

/// Error type that implements IntoResponse
pub(crate) struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request error: {:?}", self.error);
        }
        (
            self.status,
            Json(json!({
                "error": self.error.to_string(),
            })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn not_found(error: anyhow::Error) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, error)
    }

    pub fn conflict(error: anyhow::Error) -> Self {
        Self::with_status(StatusCode::CONFLICT, error)
    }
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/analytics/performance/:vehicle_id", get(get_performance))
        .route("/analytics/vehicles/states", get(get_vehicle_states))
        .route("/sessions", post(post_session))
        .route("/sessions/bulk", post(start_sessions_bulk))
        .route("/sessions/bulk/end", post(end_sessions_bulk))
        .route("/sessions/:vehicle_id", delete(delete_session))
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Entry point: wire the whole pipeline and serve until shutdown
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    init_tracing(&config);

    info!("chargestream - EV charger telemetry pipeline");

    let pool = init_storage(&config).await?;
    let queue = init_queue(&config, &pool).await?;

    let cancel = CancellationToken::new();
    let mut pipeline_tasks = Vec::new();

    // Keep next month's history partitions provisioned and drop partitions
    // past the retention horizon while the process runs
    let maintenance_pool = pool.clone();
    let maintenance_cancel = cancel.clone();
    let retention_months = config.database.history_retention_months;
    pipeline_tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(6 * 3600));
        loop {
            tokio::select! {
                _ = maintenance_cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = chargestream_storage::ensure_monthly_partitions(
                        &maintenance_pool,
                        Utc::now(),
                        1,
                    )
                    .await
                    {
                        error!(error = %e, "Partition maintenance failed");
                    }

                    if let Some(cutoff) =
                        Utc::now().checked_sub_months(Months::new(retention_months))
                    {
                        if let Err(e) = chargestream_storage::drop_partitions_before(
                            &maintenance_pool,
                            cutoff,
                        )
                        .await
                        {
                            error!(error = %e, "History retention failed");
                        }
                    }
                }
            }
        }
    }));

    // Intake adapter feeding the durable queue
    let adapter = IntakeAdapter::new(config.broker.clone(), queue.clone());
    let adapter_cancel = cancel.clone();
    pipeline_tasks.push(tokio::spawn(async move {
        if let Err(e) = adapter.run(adapter_cancel).await {
            error!(error = %e, "Intake adapter exited with error");
        }
    }));

    // One single-flight batch worker per stream
    let worker_config = WorkerConfig::from(&config.queue);
    let deadline = config.database.statement_timeout();
    for stream in [Stream::Meter, Stream::Vehicle] {
        let writer = IngestWriter::new(pool.clone(), queue.clone(), stream, deadline);
        let worker = BatchWorker::new(queue.clone(), writer, worker_config.clone());
        let worker_cancel = cancel.clone();
        pipeline_tasks.push(tokio::spawn(worker.run(worker_cancel)));
    }

    let state = AppState {
        aggregator: Aggregator::new(
            pool.clone(),
            config.analytics.window(),
            config.analytics.snapshot_limit_cap,
        ),
        sessions: SessionStore::new(pool.clone()),
        pool: pool.clone(),
    };

    let app = router(state);

    let addr = config.server.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    info!("HTTP endpoint listening on http://{}", addr);
    info!("Routes:");
    info!("  GET    http://{}/analytics/performance/:vehicleId", addr);
    info!("  GET    http://{}/analytics/vehicles/states?limit=N", addr);
    info!("  POST   http://{}/sessions", addr);
    info!("  DELETE http://{}/sessions/:vehicleId", addr);
    info!("  GET    http://{}/health", addr);
    info!("Press Ctrl+C or send SIGTERM to stop");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_cancel.cancel();
        })
        .await
        .context("Server error")?;

    // Let the intake and workers finish their in-flight work
    for task in pipeline_tasks {
        let _ = task.await;
    }

    info!("Shutdown complete; queued work persists for next startup");
    Ok(())
}
