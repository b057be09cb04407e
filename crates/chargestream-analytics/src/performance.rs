// Per-vehicle AC->DC efficiency over a trailing window
//
// A meter's samples count toward the AC total only where its session with
// the vehicle overlapped the window, and only samples inside the session's
// activity interval. The active flag alone is not enough: historical
// windows may precede session closure.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::snapshot::FleetVehicleState;
use crate::AnalyticsError;

/// Aggregated performance metrics for one vehicle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub vehicle_id: Uuid,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_ac_consumption: f64,
    pub total_dc_delivery: f64,
    pub efficiency_ratio: f64,
    pub avg_battery_temp: f64,
    pub data_points: i64,
}

/// DC delivered over AC consumed; zero when no AC was recorded.
pub fn efficiency_ratio(total_ac: f64, total_dc: f64) -> f64 {
    if total_ac > 0.0 {
        total_dc / total_ac
    } else {
        0.0
    }
}

// The two aggregates run as independent single-row subqueries:
//   dc: DC delta, mean battery temperature, and sample count for the vehicle;
//   ac: per qualifying session and meter, the AC delta of the samples inside
//       both the window and the session's activity interval, summed.
// The vehicle-id + recorded_at predicates engage partition pruning and the
// (device_id, recorded_at DESC) index on each history table.
const PERFORMANCE_SQL: &str = "\
    SELECT \
        COALESCE(ac.total_ac, 0)    AS total_ac, \
        COALESCE(dc.total_dc, 0)    AS total_dc, \
        COALESCE(dc.avg_temp, 0)    AS avg_temp, \
        COALESCE(dc.data_points, 0) AS data_points \
    FROM ( \
        SELECT \
            MAX(h.kwh_delivered_dc) - MIN(h.kwh_delivered_dc) AS total_dc, \
            AVG(h.battery_temp)                               AS avg_temp, \
            COUNT(*)                                          AS data_points \
        FROM vehicle_history h \
        WHERE h.vehicle_id = $1 \
          AND h.recorded_at >= $2 \
          AND h.recorded_at <= $3 \
    ) dc \
    CROSS JOIN ( \
        SELECT SUM(per_meter.delta) AS total_ac \
        FROM ( \
            SELECT MAX(h.kwh_consumed_ac) - MIN(h.kwh_consumed_ac) AS delta \
            FROM charging_sessions s \
            JOIN meter_history h \
              ON h.meter_id = s.meter_id \
             AND h.recorded_at >= GREATEST(s.mapped_at, $2) \
             AND h.recorded_at <= LEAST(COALESCE(s.unmapped_at, $3), $3) \
            WHERE s.vehicle_id = $1 \
              AND s.mapped_at <= $3 \
              AND (s.unmapped_at IS NULL OR s.unmapped_at >= $2) \
            GROUP BY s.id, h.meter_id \
        ) per_meter \
    ) ac";

#[derive(Clone)]
pub struct Aggregator {
    pool: PgPool,
    window: ChronoDuration,
    snapshot_limit_cap: i64,
}

impl Aggregator {
    pub fn new(pool: PgPool, window: Duration, snapshot_limit_cap: i64) -> Self {
        Self {
            pool,
            window: ChronoDuration::from_std(window).unwrap_or(ChronoDuration::hours(24)),
            snapshot_limit_cap,
        }
    }

    pub fn snapshot_limit_cap(&self) -> i64 {
        self.snapshot_limit_cap
    }

    /// Performance over the trailing configured window (default 24 h).
    pub async fn performance(&self, vehicle_id: Uuid) -> Result<PerformanceReport, AnalyticsError> {
        let window_end = Utc::now();
        self.performance_in_window(vehicle_id, window_end - self.window, window_end)
            .await
    }

    /// Performance over an explicit window.
    pub async fn performance_in_window(
        &self,
        vehicle_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<PerformanceReport, AnalyticsError> {
        let (total_ac, total_dc, avg_temp, data_points): (f64, f64, f64, i64) =
            sqlx::query_as(PERFORMANCE_SQL)
                .bind(vehicle_id)
                .bind(window_start)
                .bind(window_end)
                .fetch_one(&self.pool)
                .await?;

        // Efficiency is defined only when DC samples exist
        if data_points == 0 {
            return Err(AnalyticsError::NoData(vehicle_id));
        }

        debug!(%vehicle_id, total_ac, total_dc, data_points, "Computed performance window");

        Ok(PerformanceReport {
            vehicle_id,
            window_start,
            window_end,
            total_ac_consumption: total_ac,
            total_dc_delivery: total_dc,
            efficiency_ratio: efficiency_ratio(total_ac, total_dc),
            avg_battery_temp: avg_temp,
            data_points,
        })
    }

    /// The N most-recently-updated vehicle states, joined to the meter state
    /// of each vehicle's active session. Pure hot-store read.
    pub async fn fleet_snapshot(
        &self,
        limit: i64,
    ) -> Result<Vec<FleetVehicleState>, AnalyticsError> {
        crate::snapshot::fleet_snapshot(&self.pool, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_efficiency_ratio() {
        assert_eq!(efficiency_ratio(80.0, 72.0), 0.9);
        assert_eq!(efficiency_ratio(0.0, 5.0), 0.0);
        assert_eq!(efficiency_ratio(-1.0, 5.0), 0.0);
        assert_eq!(efficiency_ratio(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_report_wire_names() {
        let report = PerformanceReport {
            vehicle_id: Uuid::from_u128(7),
            window_start: Utc::now(),
            window_end: Utc::now(),
            total_ac_consumption: 80.0,
            total_dc_delivery: 72.0,
            efficiency_ratio: 0.9,
            avg_battery_temp: 26.5,
            data_points: 1_440,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("totalAcConsumption").is_some());
        assert!(json.get("totalDcDelivery").is_some());
        assert!(json.get("efficiencyRatio").is_some());
        assert!(json.get("avgBatteryTemp").is_some());
        assert!(json.get("dataPoints").is_some());
    }
}
