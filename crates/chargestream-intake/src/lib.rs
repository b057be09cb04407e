// chargestream-intake - Broker-fed intake adapter
//
// Subscribes to the two telemetry topic patterns, validates each delivery,
// and hands valid samples to the durable queue. The adapter is stateless:
// it never blocks on downstream work beyond the enqueue itself, and a
// failed enqueue leaves the delivery unacked so the broker redelivers.

mod adapter;
mod topic;

pub use adapter::IntakeAdapter;
pub use topic::{classify, parse_broker_url, parse_topic, Delivery};
