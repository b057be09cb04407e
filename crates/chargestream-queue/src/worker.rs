// Single-flight batch worker
//
// One worker task per stream. A new batch never begins before the previous
// one's transaction has committed or rolled back, which bounds connection
// usage at one per stream and keeps the writer's unconditional upsert safe.

use std::time::Duration;

use chargestream_config::QueueConfig;
use chargestream_core::Stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::queue::{DurableQueue, QueuedJob};
use crate::trigger::should_flush;

/// The destination a drained batch is handed to.
///
/// Implementations must be transactional: on `Ok` the jobs are gone from the
/// queue (deleted inside the sink's transaction when the queue shares the
/// database), on `Err` every job is still queued.
pub trait BatchSink: Send + Sync {
    fn stream(&self) -> Stream;

    fn write(
        &self,
        jobs: &[QueuedJob],
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub poll_interval: Duration,
    pub max_attempts: i32,
    pub retry_backoff: Duration,
    pub retry_backoff_cap: Duration,
}

impl From<&QueueConfig> for WorkerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: config.flush_interval(),
            poll_interval: config.poll_interval(),
            max_attempts: config.max_attempts,
            retry_backoff: config.retry_backoff(),
            retry_backoff_cap: config.retry_backoff_cap(),
        }
    }
}

/// Exponential backoff after consecutive batch failures, capped.
pub fn backoff_delay(consecutive_failures: u32, base: Duration, cap: Duration) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let exp = consecutive_failures.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp).min(cap)
}

pub struct BatchWorker<S> {
    queue: DurableQueue,
    sink: S,
    config: WorkerConfig,
}

impl<S: BatchSink> BatchWorker<S> {
    pub fn new(queue: DurableQueue, sink: S, config: WorkerConfig) -> Self {
        Self {
            queue,
            sink,
            config,
        }
    }

    /// Poll loop. Exits once cancelled, after finishing any in-flight batch;
    /// whatever is still queued is picked up on the next startup.
    pub async fn run(self, cancel: CancellationToken) {
        let stream = self.sink.stream();
        let mut last_flush = Instant::now();
        let mut consecutive_failures: u32 = 0;

        info!(
            %stream,
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            "Batch worker started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let depth = match self.queue.depth(stream).await {
                Ok(depth) => depth,
                Err(e) => {
                    warn!(%stream, error = %e, "Queue depth check failed");
                    if sleep_or_cancel(&cancel, self.config.poll_interval).await {
                        break;
                    }
                    continue;
                }
            };

            if !should_flush(
                depth,
                self.config.batch_size,
                last_flush.elapsed(),
                self.config.flush_interval,
            ) {
                if sleep_or_cancel(&cancel, self.config.poll_interval).await {
                    break;
                }
                continue;
            }

            match self.drain_one_batch(stream).await {
                Ok(rows) => {
                    last_flush = Instant::now();
                    consecutive_failures = 0;
                    metrics::counter!("ingest.batch.flushes", 1, "stream" => stream.as_str());
                    metrics::histogram!("ingest.batch.rows", rows as f64, "stream" => stream.as_str());
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let delay = backoff_delay(
                        consecutive_failures,
                        self.config.retry_backoff,
                        self.config.retry_backoff_cap,
                    );
                    metrics::counter!("ingest.batch.failures", 1, "stream" => stream.as_str());
                    error!(
                        %stream,
                        consecutive_failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Batch write failed; jobs stay queued"
                    );
                    if sleep_or_cancel(&cancel, delay).await {
                        break;
                    }
                }
            }
        }

        info!(%stream, "Batch worker stopped; remainder stays queued");
    }

    async fn drain_one_batch(&self, stream: Stream) -> anyhow::Result<usize> {
        let jobs = self.queue.fetch_batch(stream, self.config.batch_size).await?;
        if jobs.is_empty() {
            return Ok(0);
        }

        match self.sink.write(&jobs).await {
            Ok(()) => Ok(jobs.len()),
            Err(e) => {
                let job_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
                let dead = self
                    .queue
                    .record_failure(&job_ids, &e.to_string(), self.config.max_attempts)
                    .await?;
                if dead > 0 {
                    metrics::counter!(
                        "ingest.jobs.dead_lettered",
                        dead,
                        "stream" => stream.as_str()
                    );
                }
                Err(e)
            }
        }
    }
}

/// Sleep that wakes early on cancellation. Returns true when cancelled.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
