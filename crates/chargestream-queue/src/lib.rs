// chargestream-queue - Durable ingest queue and batch worker
//
// The queue absorbs bursts between the intake adapter and the writer. It is
// Postgres-backed so enqueued work survives a process crash, and can sit on
// its own endpoint (defaulting to the main database). One single-flight
// worker per stream drains the queue into batches governed by a size
// trigger and a time trigger.

use thiserror::Error;

mod queue;
mod trigger;
mod worker;

pub use queue::{DurableQueue, QueuedJob};
pub use trigger::should_flush;
pub use worker::{backoff_delay, BatchSink, BatchWorker, WorkerConfig};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("failed to encode sample payload: {0}")]
    Encode(#[from] serde_json::Error),
}
