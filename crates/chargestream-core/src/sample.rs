use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Stream;

/// Wire payload published on `telemetry/meter/<meterId>`
///
/// The timestamp stays a raw string here; parsing it is part of validation
/// so a bad value becomes a rejection reason instead of a serde error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterPayload {
    pub meter_id: String,
    pub kwh_consumed_ac: f64,
    pub voltage: f64,
    pub timestamp: String,
}

/// Wire payload published on `telemetry/vehicle/<vehicleId>`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehiclePayload {
    pub vehicle_id: String,
    pub soc: f64,
    pub kwh_delivered_dc: f64,
    pub battery_temp: f64,
    pub timestamp: String,
}

/// Validated AC meter sample carried through the queue and writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterSample {
    pub meter_id: Uuid,
    pub kwh_consumed_ac: f64,
    pub voltage: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Validated DC vehicle sample carried through the queue and writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSample {
    pub vehicle_id: Uuid,
    pub soc: f64,
    pub kwh_delivered_dc: f64,
    pub battery_temp: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A validated sample from either stream
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Meter(MeterSample),
    Vehicle(VehicleSample),
}

impl Sample {
    pub fn stream(&self) -> Stream {
        match self {
            Sample::Meter(_) => Stream::Meter,
            Sample::Vehicle(_) => Stream::Vehicle,
        }
    }

    pub fn device_id(&self) -> Uuid {
        match self {
            Sample::Meter(s) => s.meter_id,
            Sample::Vehicle(s) => s.vehicle_id,
        }
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            Sample::Meter(s) => s.recorded_at,
            Sample::Vehicle(s) => s.recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_payload_field_names() {
        let json = r#"{
            "meterId": "0be3cbd4-5408-4e6f-9df0-1fbf1f66f0b8",
            "kwhConsumedAc": 12.500,
            "voltage": 230.00,
            "timestamp": "2026-07-01T08:00:00Z"
        }"#;
        let payload: MeterPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.kwh_consumed_ac, 12.5);
        assert_eq!(payload.voltage, 230.0);
    }

    #[test]
    fn test_vehicle_payload_missing_field_is_error() {
        let json = r#"{"vehicleId": "x", "soc": 50.0, "timestamp": "2026-07-01T08:00:00Z"}"#;
        assert!(serde_json::from_str::<VehiclePayload>(json).is_err());
    }

    #[test]
    fn test_sample_accessors() {
        let id = Uuid::new_v4();
        let sample = Sample::Vehicle(VehicleSample {
            vehicle_id: id,
            soc: 80.0,
            kwh_delivered_dc: 4.2,
            battery_temp: 25.0,
            recorded_at: Utc::now(),
        });
        assert_eq!(sample.stream(), Stream::Vehicle);
        assert_eq!(sample.device_id(), id);
    }
}
