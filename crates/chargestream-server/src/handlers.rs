// HTTP request handlers
//
// Thin layer: decode, delegate to the aggregator or session service, map
// error kinds to status codes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chargestream_analytics::{clamp_snapshot_limit, AnalyticsError};
use chargestream_storage::{SessionError, SessionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{AppError, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct SnapshotQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartSessionRequest {
    vehicle_id: Uuid,
    meter_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BulkEndRequest {
    vehicle_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionResponse {
    vehicle_id: Uuid,
    meter_id: Uuid,
    mapped_at: DateTime<Utc>,
    unmapped_at: Option<DateTime<Utc>>,
    active: bool,
}

impl From<SessionRecord> for SessionResponse {
    fn from(record: SessionRecord) -> Self {
        Self {
            vehicle_id: record.vehicle_id,
            meter_id: record.meter_id,
            mapped_at: record.mapped_at,
            unmapped_at: record.unmapped_at,
            active: record.active,
        }
    }
}

/// GET /analytics/performance/{vehicleId}
pub(crate) async fn get_performance(
    State(state): State<AppState>,
    Path(vehicle_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .aggregator
        .performance(vehicle_id)
        .await
        .map_err(map_analytics_error)?;
    Ok(Json(report))
}

/// GET /analytics/vehicles/states?limit=N
pub(crate) async fn get_vehicle_states(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = clamp_snapshot_limit(query.limit, state.aggregator.snapshot_limit_cap());
    let rows = state
        .aggregator
        .fleet_snapshot(limit)
        .await
        .map_err(map_analytics_error)?;
    Ok(Json(rows))
}

/// POST /sessions - operator API: plug a vehicle into a meter
pub(crate) async fn post_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .sessions
        .start(request.vehicle_id, request.meter_id)
        .await
        .map_err(map_session_error)?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(record))))
}

/// DELETE /sessions/{vehicleId} - operator API: unplug a vehicle
pub(crate) async fn delete_session(
    State(state): State<AppState>,
    Path(vehicle_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .sessions
        .end(vehicle_id)
        .await
        .map_err(map_session_error)?;
    Ok(Json(SessionResponse::from(record)))
}

/// POST /sessions/bulk - all-or-nothing fleet-wide session start
pub(crate) async fn start_sessions_bulk(
    State(state): State<AppState>,
    Json(requests): Json<Vec<StartSessionRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let pairs: Vec<(Uuid, Uuid)> = requests
        .iter()
        .map(|r| (r.vehicle_id, r.meter_id))
        .collect();
    let records = state
        .sessions
        .start_bulk(&pairs)
        .await
        .map_err(map_session_error)?;
    let responses: Vec<SessionResponse> = records.into_iter().map(SessionResponse::from).collect();
    Ok((StatusCode::CREATED, Json(responses)))
}

/// POST /sessions/bulk/end - best-effort fleet-wide session end
pub(crate) async fn end_sessions_bulk(
    State(state): State<AppState>,
    Json(request): Json<BulkEndRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ended = state
        .sessions
        .end_bulk(&request.vehicle_ids)
        .await
        .map_err(map_session_error)?;
    Ok(Json(json!({ "ended": ended })))
}

/// GET /health - Basic health check
pub(crate) async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

/// GET /ready - Readiness check: can we reach the database?
pub(crate) async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable", "error": e.to_string()})),
        ),
    }
}

fn map_analytics_error(err: AnalyticsError) -> AppError {
    match err {
        AnalyticsError::NoData(_) => AppError::not_found(err.into()),
        AnalyticsError::Db(_) => err.into(),
    }
}

fn map_session_error(err: SessionError) -> AppError {
    match err {
        SessionError::Conflict(_) | SessionError::BulkConflict(_) => AppError::conflict(err.into()),
        SessionError::NotFound(_) => AppError::not_found(err.into()),
        SessionError::Db(_) => err.into(),
    }
}
