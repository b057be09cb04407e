// Fleet snapshot: hot-state read across the fleet

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::AnalyticsError;

/// One vehicle's latest state, with the meter state of its active session
/// when it has one.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FleetVehicleState {
    pub vehicle_id: Uuid,
    pub soc: f64,
    pub kwh_delivered_dc: f64,
    pub battery_temp: f64,
    pub recorded_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub meter_id: Option<Uuid>,
    pub meter_kwh_consumed_ac: Option<f64>,
    pub meter_voltage: Option<f64>,
    pub meter_last_updated: Option<DateTime<Utc>>,
}

/// Clamp a requested snapshot limit into [1, cap]; `None` means the cap.
pub fn clamp_snapshot_limit(requested: Option<i64>, cap: i64) -> i64 {
    requested.unwrap_or(cap).clamp(1, cap)
}

pub(crate) async fn fleet_snapshot(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<FleetVehicleState>, AnalyticsError> {
    let rows = sqlx::query_as::<_, FleetVehicleState>(
        "SELECT v.vehicle_id, v.soc, v.kwh_delivered_dc, v.battery_temp, \
                v.recorded_at, v.last_updated, \
                s.meter_id             AS meter_id, \
                m.kwh_consumed_ac      AS meter_kwh_consumed_ac, \
                m.voltage              AS meter_voltage, \
                m.last_updated         AS meter_last_updated \
         FROM vehicle_states v \
         LEFT JOIN charging_sessions s ON s.vehicle_id = v.vehicle_id AND s.active \
         LEFT JOIN meter_states m ON m.meter_id = s.meter_id \
         ORDER BY v.last_updated DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
