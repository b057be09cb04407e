// chargestream-writer - Transactional dual write
//
// Consumes a drained batch and executes exactly one transaction: a bulk
// upsert of the deduplicated latest sample per device into the hot-state
// table, a bulk append of every sample into the partitioned history table,
// and removal of the drained queue rows. Each statement is a single round
// trip (column-parallel UNNEST arrays).
//
// The upsert's conflict clause overwrites unconditionally. That is only
// correct while the queue worker is single-flight per stream; a second
// writer on the same stream would need a `recorded_at` guard on the upsert.

use std::time::Duration;

use chargestream_core::{MeterSample, Sample, Stream, VehicleSample};
use chargestream_queue::{BatchSink, DurableQueue, QueuedJob};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

mod dedup;

pub use dedup::dedup_latest;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("batch transaction exceeded the {0:?} deadline")]
    Deadline(Duration),

    #[error(transparent)]
    Queue(#[from] chargestream_queue::QueueError),

    #[error("job {0} carried a sample from the wrong stream")]
    WrongStream(i64),
}

pub struct IngestWriter {
    db: PgPool,
    queue: DurableQueue,
    stream: Stream,
    deadline: Duration,
}

impl IngestWriter {
    pub fn new(db: PgPool, queue: DurableQueue, stream: Stream, deadline: Duration) -> Self {
        Self {
            db,
            queue,
            stream,
            deadline,
        }
    }

    async fn write_batch(&self, jobs: &[QueuedJob]) -> Result<(), WriterError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let job_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();

        let mut tx = self.db.begin().await?;
        match self.stream {
            Stream::Meter => {
                let samples = meter_samples(jobs)?;
                upsert_meter_states(&mut tx, &dedup_latest(&samples, |s| s.meter_id, |s| s.recorded_at)).await?;
                append_meter_history(&mut tx, &samples).await?;
            }
            Stream::Vehicle => {
                let samples = vehicle_samples(jobs)?;
                upsert_vehicle_states(&mut tx, &dedup_latest(&samples, |s| s.vehicle_id, |s| s.recorded_at)).await?;
                append_vehicle_history(&mut tx, &samples).await?;
            }
        }

        if self.queue.shares_primary() {
            sqlx::query("DELETE FROM ingest_jobs WHERE id = ANY($1)")
                .bind(&job_ids)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        if !self.queue.shares_primary() {
            self.queue.delete_jobs(&job_ids).await?;
        }

        debug!(stream = %self.stream, rows = jobs.len(), "Committed batch");
        Ok(())
    }
}

impl BatchSink for IngestWriter {
    fn stream(&self) -> Stream {
        self.stream
    }

    async fn write(&self, jobs: &[QueuedJob]) -> anyhow::Result<()> {
        match tokio::time::timeout(self.deadline, self.write_batch(jobs)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WriterError::Deadline(self.deadline).into()),
        }
    }
}

fn meter_samples(jobs: &[QueuedJob]) -> Result<Vec<MeterSample>, WriterError> {
    jobs.iter()
        .map(|job| match &job.sample {
            Sample::Meter(s) => Ok(s.clone()),
            Sample::Vehicle(_) => Err(WriterError::WrongStream(job.id)),
        })
        .collect()
}

fn vehicle_samples(jobs: &[QueuedJob]) -> Result<Vec<VehicleSample>, WriterError> {
    jobs.iter()
        .map(|job| match &job.sample {
            Sample::Vehicle(s) => Ok(s.clone()),
            Sample::Meter(_) => Err(WriterError::WrongStream(job.id)),
        })
        .collect()
}

struct MeterColumns {
    ids: Vec<Uuid>,
    kwh: Vec<f64>,
    voltage: Vec<f64>,
    recorded_at: Vec<DateTime<Utc>>,
}

fn meter_columns<'a>(samples: impl IntoIterator<Item = &'a MeterSample>) -> MeterColumns {
    let mut columns = MeterColumns {
        ids: Vec::new(),
        kwh: Vec::new(),
        voltage: Vec::new(),
        recorded_at: Vec::new(),
    };
    for sample in samples {
        columns.ids.push(sample.meter_id);
        columns.kwh.push(sample.kwh_consumed_ac);
        columns.voltage.push(sample.voltage);
        columns.recorded_at.push(sample.recorded_at);
    }
    columns
}

struct VehicleColumns {
    ids: Vec<Uuid>,
    soc: Vec<f64>,
    kwh: Vec<f64>,
    battery_temp: Vec<f64>,
    recorded_at: Vec<DateTime<Utc>>,
}

fn vehicle_columns<'a>(samples: impl IntoIterator<Item = &'a VehicleSample>) -> VehicleColumns {
    let mut columns = VehicleColumns {
        ids: Vec::new(),
        soc: Vec::new(),
        kwh: Vec::new(),
        battery_temp: Vec::new(),
        recorded_at: Vec::new(),
    };
    for sample in samples {
        columns.ids.push(sample.vehicle_id);
        columns.soc.push(sample.soc);
        columns.kwh.push(sample.kwh_delivered_dc);
        columns.battery_temp.push(sample.battery_temp);
        columns.recorded_at.push(sample.recorded_at);
    }
    columns
}

async fn upsert_meter_states(
    tx: &mut Transaction<'_, Postgres>,
    deduped: &[&MeterSample],
) -> Result<(), sqlx::Error> {
    let columns = meter_columns(deduped.iter().copied());
    sqlx::query(
        "INSERT INTO meter_states (meter_id, kwh_consumed_ac, voltage, recorded_at, last_updated) \
         SELECT u.meter_id, u.kwh_consumed_ac, u.voltage, u.recorded_at, now() \
         FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::timestamptz[]) \
              AS u(meter_id, kwh_consumed_ac, voltage, recorded_at) \
         ON CONFLICT (meter_id) DO UPDATE SET \
             kwh_consumed_ac = EXCLUDED.kwh_consumed_ac, \
             voltage = EXCLUDED.voltage, \
             recorded_at = EXCLUDED.recorded_at, \
             last_updated = EXCLUDED.last_updated",
    )
    .bind(&columns.ids)
    .bind(&columns.kwh)
    .bind(&columns.voltage)
    .bind(&columns.recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn append_meter_history(
    tx: &mut Transaction<'_, Postgres>,
    samples: &[MeterSample],
) -> Result<(), sqlx::Error> {
    let columns = meter_columns(samples);
    sqlx::query(
        "INSERT INTO meter_history (meter_id, kwh_consumed_ac, voltage, recorded_at) \
         SELECT * FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::timestamptz[])",
    )
    .bind(&columns.ids)
    .bind(&columns.kwh)
    .bind(&columns.voltage)
    .bind(&columns.recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_vehicle_states(
    tx: &mut Transaction<'_, Postgres>,
    deduped: &[&VehicleSample],
) -> Result<(), sqlx::Error> {
    let columns = vehicle_columns(deduped.iter().copied());
    sqlx::query(
        "INSERT INTO vehicle_states (vehicle_id, soc, kwh_delivered_dc, battery_temp, recorded_at, last_updated) \
         SELECT u.vehicle_id, u.soc, u.kwh_delivered_dc, u.battery_temp, u.recorded_at, now() \
         FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::float8[], $5::timestamptz[]) \
              AS u(vehicle_id, soc, kwh_delivered_dc, battery_temp, recorded_at) \
         ON CONFLICT (vehicle_id) DO UPDATE SET \
             soc = EXCLUDED.soc, \
             kwh_delivered_dc = EXCLUDED.kwh_delivered_dc, \
             battery_temp = EXCLUDED.battery_temp, \
             recorded_at = EXCLUDED.recorded_at, \
             last_updated = EXCLUDED.last_updated",
    )
    .bind(&columns.ids)
    .bind(&columns.soc)
    .bind(&columns.kwh)
    .bind(&columns.battery_temp)
    .bind(&columns.recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn append_vehicle_history(
    tx: &mut Transaction<'_, Postgres>,
    samples: &[VehicleSample],
) -> Result<(), sqlx::Error> {
    let columns = vehicle_columns(samples);
    sqlx::query(
        "INSERT INTO vehicle_history (vehicle_id, soc, kwh_delivered_dc, battery_temp, recorded_at) \
         SELECT * FROM UNNEST($1::uuid[], $2::float8[], $3::float8[], $4::float8[], $5::timestamptz[])",
    )
    .bind(&columns.ids)
    .bind(&columns.soc)
    .bind(&columns.kwh)
    .bind(&columns.battery_temp)
    .bind(&columns.recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
