// Postgres-backed durable queue
//
// Jobs are plain rows; a drained batch is only removed once the writer's
// transaction commits, so rollback automatically returns ownership to the
// queue. Jobs whose attempts are exhausted move to a dead-letter table for
// inspection instead of blocking the stream.

use chargestream_core::{MeterSample, Sample, Stream, VehicleSample};
use sqlx::PgPool;
use tracing::{error, warn};

use crate::QueueError;

/// A job drained from the queue, ready for the writer
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: i64,
    pub sample: Sample,
    pub attempts: i32,
}

#[derive(Clone)]
pub struct DurableQueue {
    pool: PgPool,
    /// Whether the queue tables live in the same database as the hot-state
    /// and history tables. When true the writer deletes drained jobs inside
    /// its own transaction.
    shares_primary: bool,
}

impl DurableQueue {
    pub fn new(pool: PgPool, shares_primary: bool) -> Self {
        Self {
            pool,
            shares_primary,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn shares_primary(&self) -> bool {
        self.shares_primary
    }

    /// Create the queue tables if missing. The queue may sit on a separate
    /// endpoint, so its schema is provisioned here rather than in the main
    /// migration set.
    pub async fn ensure_schema(&self) -> Result<(), QueueError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ingest_jobs (
                 id          BIGSERIAL PRIMARY KEY,
                 stream      TEXT NOT NULL,
                 payload     JSONB NOT NULL,
                 attempts    INTEGER NOT NULL DEFAULT 0,
                 enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ingest_jobs_stream_id_idx \
             ON ingest_jobs (stream, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ingest_jobs_dead (
                 id          BIGINT PRIMARY KEY,
                 stream      TEXT NOT NULL,
                 payload     JSONB NOT NULL,
                 attempts    INTEGER NOT NULL,
                 enqueued_at TIMESTAMPTZ NOT NULL,
                 failed_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
                 last_error  TEXT NOT NULL
             )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist one validated sample. Fire-and-forget from the adapter's
    /// perspective: once this returns, the queue owns the sample.
    pub async fn enqueue(&self, sample: &Sample) -> Result<i64, QueueError> {
        let payload = match sample {
            Sample::Meter(s) => serde_json::to_value(s)?,
            Sample::Vehicle(s) => serde_json::to_value(s)?,
        };

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO ingest_jobs (stream, payload) VALUES ($1, $2) RETURNING id",
        )
        .bind(sample.stream().as_str())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Current number of waiting jobs for a stream.
    pub async fn depth(&self, stream: Stream) -> Result<i64, QueueError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM ingest_jobs WHERE stream = $1")
                .bind(stream.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Drain up to `limit` of the oldest jobs for a stream. The rows stay in
    /// the queue until the writer's transaction deletes them. Jobs whose
    /// payload no longer decodes are buried in the dead-letter table so they
    /// cannot wedge the stream.
    pub async fn fetch_batch(
        &self,
        stream: Stream,
        limit: usize,
    ) -> Result<Vec<QueuedJob>, QueueError> {
        let rows: Vec<(i64, serde_json::Value, i32)> = sqlx::query_as(
            "SELECT id, payload, attempts FROM ingest_jobs \
             WHERE stream = $1 ORDER BY id LIMIT $2",
        )
        .bind(stream.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        let mut poisoned = Vec::new();
        for (id, payload, attempts) in rows {
            match decode_sample(stream, payload) {
                Ok(sample) => jobs.push(QueuedJob {
                    id,
                    sample,
                    attempts,
                }),
                Err(e) => {
                    error!(job_id = id, %stream, error = %e, "Undecodable job payload");
                    poisoned.push(id);
                }
            }
        }

        if !poisoned.is_empty() {
            self.bury(&poisoned, "undecodable payload").await?;
            metrics::counter!(
                "ingest.jobs.dead_lettered",
                poisoned.len() as u64,
                "stream" => stream.as_str()
            );
        }

        Ok(jobs)
    }

    /// Record a failed batch attempt. Jobs that have now reached
    /// `max_attempts` move to the dead-letter table; the rest stay queued for
    /// the next retry. Returns how many were dead-lettered.
    pub async fn record_failure(
        &self,
        job_ids: &[i64],
        last_error: &str,
        max_attempts: i32,
    ) -> Result<u64, QueueError> {
        if job_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE ingest_jobs SET attempts = attempts + 1 WHERE id = ANY($1)")
            .bind(job_ids)
            .execute(&mut *tx)
            .await?;

        let moved = sqlx::query(
            "WITH exhausted AS (
                 DELETE FROM ingest_jobs
                 WHERE id = ANY($1) AND attempts >= $2
                 RETURNING id, stream, payload, attempts, enqueued_at
             )
             INSERT INTO ingest_jobs_dead (id, stream, payload, attempts, enqueued_at, last_error)
             SELECT id, stream, payload, attempts, enqueued_at, $3 FROM exhausted",
        )
        .bind(job_ids)
        .bind(max_attempts)
        .bind(last_error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if moved.rows_affected() > 0 {
            warn!(
                count = moved.rows_affected(),
                last_error, "Jobs exhausted retries and moved to dead-letter"
            );
        }

        Ok(moved.rows_affected())
    }

    /// Remove committed jobs. Only used when the queue lives on a separate
    /// endpoint; otherwise the writer deletes inside its transaction.
    pub async fn delete_jobs(&self, job_ids: &[i64]) -> Result<(), QueueError> {
        if job_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM ingest_jobs WHERE id = ANY($1)")
            .bind(job_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of dead-lettered jobs for a stream.
    pub async fn dead_letter_depth(&self, stream: Stream) -> Result<i64, QueueError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM ingest_jobs_dead WHERE stream = $1")
                .bind(stream.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Move jobs straight to the dead-letter table, bypassing the attempt
    /// counter. Used for payloads that can no longer be decoded.
    async fn bury(&self, job_ids: &[i64], reason: &str) -> Result<(), QueueError> {
        sqlx::query(
            "WITH buried AS (
                 DELETE FROM ingest_jobs WHERE id = ANY($1)
                 RETURNING id, stream, payload, attempts, enqueued_at
             )
             INSERT INTO ingest_jobs_dead (id, stream, payload, attempts, enqueued_at, last_error)
             SELECT id, stream, payload, attempts, enqueued_at, $2 FROM buried",
        )
        .bind(job_ids)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn decode_sample(stream: Stream, payload: serde_json::Value) -> Result<Sample, serde_json::Error> {
    match stream {
        Stream::Meter => serde_json::from_value::<MeterSample>(payload).map(Sample::Meter),
        Stream::Vehicle => serde_json::from_value::<VehicleSample>(payload).map(Sample::Vehicle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_decode_sample_round_trip() {
        let sample = MeterSample {
            meter_id: Uuid::new_v4(),
            kwh_consumed_ac: 12.5,
            voltage: 230.0,
            recorded_at: Utc::now(),
        };
        let value = serde_json::to_value(&sample).unwrap();
        let decoded = decode_sample(Stream::Meter, value).unwrap();
        assert_eq!(decoded, Sample::Meter(sample));
    }

    #[test]
    fn test_decode_wrong_stream_fails() {
        let sample = MeterSample {
            meter_id: Uuid::new_v4(),
            kwh_consumed_ac: 12.5,
            voltage: 230.0,
            recorded_at: Utc::now(),
        };
        let value = serde_json::to_value(&sample).unwrap();
        assert!(decode_sample(Stream::Vehicle, value).is_err());
    }
}
