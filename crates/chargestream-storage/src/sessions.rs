// Session service: vehicle <-> meter associations
//
// Sessions are written by operators, never by the ingestion path. The
// database enforces at most one active session per vehicle through the
// partial unique index; a violation surfaces here as a conflict.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("vehicle {0} already has an active session")]
    Conflict(Uuid),

    #[error("vehicles already in active sessions: {0:?}")]
    BulkConflict(Vec<Uuid>),

    #[error("no active session for vehicle {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: i64,
    pub vehicle_id: Uuid,
    pub meter_id: Uuid,
    pub mapped_at: DateTime<Utc>,
    pub unmapped_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ActiveSession {
    pub meter_id: Uuid,
    pub mapped_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStore {
    pool: PgPool,
}

impl SessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a session. Fails with `Conflict` if the vehicle already has an
    /// active one.
    pub async fn start(
        &self,
        vehicle_id: Uuid,
        meter_id: Uuid,
    ) -> Result<SessionRecord, SessionError> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "INSERT INTO charging_sessions (vehicle_id, meter_id) \
             VALUES ($1, $2) \
             RETURNING id, vehicle_id, meter_id, mapped_at, unmapped_at, active",
        )
        .bind(vehicle_id)
        .bind(meter_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify_unique_violation(e, vehicle_id))?;

        info!(%vehicle_id, %meter_id, "Session started");
        Ok(record)
    }

    /// Close the vehicle's active session. Fails with `NotFound` if none
    /// exists.
    pub async fn end(&self, vehicle_id: Uuid) -> Result<SessionRecord, SessionError> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "UPDATE charging_sessions \
             SET active = FALSE, unmapped_at = now() \
             WHERE vehicle_id = $1 AND active \
             RETURNING id, vehicle_id, meter_id, mapped_at, unmapped_at, active",
        )
        .bind(vehicle_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SessionError::NotFound(vehicle_id))?;

        info!(%vehicle_id, meter_id = %record.meter_id, "Session ended");
        Ok(record)
    }

    /// The vehicle's currently-active session, if any.
    pub async fn active_for(&self, vehicle_id: Uuid) -> Result<Option<ActiveSession>, SessionError> {
        let session = sqlx::query_as::<_, ActiveSession>(
            "SELECT meter_id, mapped_at FROM charging_sessions \
             WHERE vehicle_id = $1 AND active",
        )
        .bind(vehicle_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    /// Open sessions for many (vehicle, meter) pairs in one transaction.
    /// All-or-nothing: any vehicle with an existing active session aborts the
    /// whole batch and is reported.
    pub async fn start_bulk(
        &self,
        pairs: &[(Uuid, Uuid)],
    ) -> Result<Vec<SessionRecord>, SessionError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let vehicle_ids: Vec<Uuid> = pairs.iter().map(|(v, _)| *v).collect();
        let meter_ids: Vec<Uuid> = pairs.iter().map(|(_, m)| *m).collect();

        // A vehicle repeated within one request can never end up with two
        // active sessions; reject before touching the database
        let duplicates = duplicate_vehicles(&vehicle_ids);
        if !duplicates.is_empty() {
            return Err(SessionError::BulkConflict(duplicates));
        }

        let mut tx = self.pool.begin().await?;

        let conflicting = active_among(&mut *tx, &vehicle_ids).await?;
        if !conflicting.is_empty() {
            return Err(SessionError::BulkConflict(conflicting));
        }

        let inserted = sqlx::query_as::<_, SessionRecord>(
            "INSERT INTO charging_sessions (vehicle_id, meter_id) \
             SELECT * FROM UNNEST($1::uuid[], $2::uuid[]) \
             RETURNING id, vehicle_id, meter_id, mapped_at, unmapped_at, active",
        )
        .bind(&vehicle_ids)
        .bind(&meter_ids)
        .fetch_all(&mut *tx)
        .await;

        let records = match inserted {
            Ok(records) => records,
            // A start() racing between the pre-check and the insert still
            // trips the partial unique index; re-read the offenders
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                let conflicting = active_among(&self.pool, &vehicle_ids).await?;
                return Err(SessionError::BulkConflict(conflicting));
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;

        info!(count = records.len(), "Bulk session start");
        Ok(records)
    }

    /// Close the active sessions of the given vehicles. Best-effort: vehicles
    /// without an active session are skipped; returns the count closed.
    pub async fn end_bulk(&self, vehicle_ids: &[Uuid]) -> Result<u64, SessionError> {
        if vehicle_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE charging_sessions \
             SET active = FALSE, unmapped_at = now() \
             WHERE vehicle_id = ANY($1) AND active",
        )
        .bind(vehicle_ids)
        .execute(&self.pool)
        .await?;

        info!(count = result.rows_affected(), "Bulk session end");
        Ok(result.rows_affected())
    }
}

/// The vehicles this set of active sessions would collide with.
async fn active_among<'e, E>(executor: E, vehicle_ids: &[Uuid]) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT vehicle_id FROM charging_sessions \
         WHERE active AND vehicle_id = ANY($1)",
    )
    .bind(vehicle_ids)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(v,)| v).collect())
}

/// Vehicle ids appearing more than once, in first-seen order.
fn duplicate_vehicles(vehicle_ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for id in vehicle_ids {
        if !seen.insert(*id) && !duplicates.contains(id) {
            duplicates.push(*id);
        }
    }
    duplicates
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

fn classify_unique_violation(err: sqlx::Error, vehicle_id: Uuid) -> SessionError {
    if is_unique_violation(&err) {
        SessionError::Conflict(vehicle_id)
    } else {
        SessionError::Db(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_vehicle() {
        let id = Uuid::new_v4();
        let err = SessionError::NotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_non_unique_violation_passes_through() {
        assert!(!is_unique_violation(&sqlx::Error::PoolClosed));
        let err = classify_unique_violation(sqlx::Error::PoolClosed, Uuid::new_v4());
        assert!(matches!(err, SessionError::Db(_)));
    }

    #[test]
    fn test_duplicate_vehicles() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        assert!(duplicate_vehicles(&[a, b, c]).is_empty());
        assert_eq!(duplicate_vehicles(&[a, b, a, c, b, a]), vec![a, b]);
        assert!(duplicate_vehicles(&[]).is_empty());
    }
}
