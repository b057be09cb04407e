// chargestream-analytics - Correlated analytic queries
//
// Fuses the AC and DC streams for a vehicle through the session mapping.
// The AC and DC aggregates are computed in independent subqueries and
// combined by a single-row cross join; joining history to history directly
// would produce a cartesian blow-up on the partitioned tables.

use thiserror::Error;
use uuid::Uuid;

mod performance;
mod snapshot;

pub use performance::{efficiency_ratio, Aggregator, PerformanceReport};
pub use snapshot::{clamp_snapshot_limit, FleetVehicleState};

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("no telemetry recorded for vehicle {0} in the requested window")]
    NoData(Uuid),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
