// Topic parsing and delivery classification
//
// Pure functions so the accept/drop decision is testable without a broker.

use chargestream_core::{validate_meter, validate_vehicle, Sample, Stream};
use uuid::Uuid;

/// Parse `telemetry/<stream>/<deviceId>` into a stream and device id.
pub fn parse_topic(topic: &str) -> Option<(Stream, Uuid)> {
    let mut segments = topic.split('/');
    if segments.next()? != "telemetry" {
        return None;
    }
    let stream = segments.next()?.parse::<Stream>().ok()?;
    let device_id = segments.next()?.parse::<Uuid>().ok()?;
    if segments.next().is_some() {
        return None;
    }
    Some((stream, device_id))
}

/// Parse `mqtt://host:port` (or `tcp://host:port`) into host and port.
/// The port defaults to 1883 when absent.
pub fn parse_broker_url(url: &str) -> anyhow::Result<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                anyhow::bail!("invalid broker url `{}`", url);
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("invalid broker port in `{}`", url))?;
            Ok((host.to_string(), port))
        }
        None if !rest.is_empty() => Ok((rest.to_string(), 1883)),
        None => anyhow::bail!("invalid broker url `{}`", url),
    }
}

/// What the adapter decided about one delivery
#[derive(Debug)]
pub enum Delivery {
    /// Valid sample; enqueue, then ack
    Accepted(Sample),
    /// Invalid; ack and drop, counting under `label`
    Rejected { label: &'static str, detail: String },
}

/// Classify one broker delivery.
pub fn classify(topic: &str, payload: &[u8]) -> Delivery {
    let Some((stream, device_id)) = parse_topic(topic) else {
        return Delivery::Rejected {
            label: "unknown_topic",
            detail: topic.to_string(),
        };
    };

    let validated = match stream {
        Stream::Meter => validate_meter(device_id, payload).map(Sample::Meter),
        Stream::Vehicle => validate_vehicle(device_id, payload).map(Sample::Vehicle),
    };

    match validated {
        Ok(sample) => Delivery::Accepted(sample),
        Err(reason) => Delivery::Rejected {
            label: reason.label(),
            detail: reason.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METER_ID: &str = "0be3cbd4-5408-4e6f-9df0-1fbf1f66f0b8";

    #[test]
    fn test_parse_topic() {
        let (stream, id) = parse_topic(&format!("telemetry/meter/{}", METER_ID)).unwrap();
        assert_eq!(stream, Stream::Meter);
        assert_eq!(id.to_string(), METER_ID);
    }

    #[test]
    fn test_parse_topic_rejects_garbage() {
        assert!(parse_topic("telemetry/meter").is_none());
        assert!(parse_topic("telemetry/toaster/abc").is_none());
        assert!(parse_topic(&format!("other/meter/{}", METER_ID)).is_none());
        assert!(parse_topic(&format!("telemetry/meter/{}/extra", METER_ID)).is_none());
        assert!(parse_topic("telemetry/meter/not-a-uuid").is_none());
    }

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://broker.fleet:1884").unwrap(),
            ("broker.fleet".to_string(), 1884)
        );
        assert_eq!(
            parse_broker_url("tcp://127.0.0.1:1883").unwrap(),
            ("127.0.0.1".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("mqtt://broker.fleet").unwrap(),
            ("broker.fleet".to_string(), 1883)
        );
        assert!(parse_broker_url("mqtt://:1883").is_err());
        assert!(parse_broker_url("mqtt://broker.fleet:zzz").is_err());
    }

    #[test]
    fn test_classify_accepts_valid_meter() {
        let topic = format!("telemetry/meter/{}", METER_ID);
        let payload = format!(
            r#"{{"meterId":"{}","kwhConsumedAc":12.5,"voltage":230.0,"timestamp":"2026-07-01T08:00:00Z"}}"#,
            METER_ID
        );
        match classify(&topic, payload.as_bytes()) {
            Delivery::Accepted(Sample::Meter(sample)) => {
                assert_eq!(sample.kwh_consumed_ac, 12.5);
            }
            other => panic!("expected accepted meter sample, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_out_of_range() {
        let topic = format!("telemetry/meter/{}", METER_ID);
        let payload = format!(
            r#"{{"meterId":"{}","kwhConsumedAc":12.5,"voltage":900.0,"timestamp":"2026-07-01T08:00:00Z"}}"#,
            METER_ID
        );
        match classify(&topic, payload.as_bytes()) {
            Delivery::Rejected { label, .. } => assert_eq!(label, "out_of_range"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_unknown_topic() {
        match classify("telemetry/toaster/abc", b"{}") {
            Delivery::Rejected { label, .. } => assert_eq!(label, "unknown_topic"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
