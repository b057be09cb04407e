// chargestream-core - Domain types shared across the pipeline
//
// Defines the two telemetry streams (AC meters, DC vehicles), the wire
// payloads devices publish, the canonical samples the pipeline carries,
// and the strict validation applied at the intake boundary.

mod sample;
mod stream;
mod validate;

pub use sample::{MeterPayload, MeterSample, Sample, VehiclePayload, VehicleSample};
pub use stream::Stream;
pub use validate::{validate_meter, validate_vehicle, RejectReason};
