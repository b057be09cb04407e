use std::fmt;
use std::str::FromStr;

/// The two independent telemetry streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// AC smart meters (grid-side energy, line voltage)
    Meter,
    /// Vehicles (SoC, battery-side energy, battery temperature)
    Vehicle,
}

impl Stream {
    /// Returns the string representation used in queue rows and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Meter => "meter",
            Stream::Vehicle => "vehicle",
        }
    }

    /// Broker topic filter this stream's devices publish under
    pub fn topic_filter(&self) -> &'static str {
        match self {
            Stream::Meter => "telemetry/meter/+",
            Stream::Vehicle => "telemetry/vehicle/+",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meter" => Ok(Stream::Meter),
            "vehicle" => Ok(Stream::Vehicle),
            _ => Err(format!("unknown stream: {}", s)),
        }
    }
}
