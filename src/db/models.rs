//! Database model types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// The outcome of one probe execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub endpoint: String,
    /// Capture instant, taken when the probe started.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
    /// HTTP status, or `None` for a transport failure.
    pub status: Option<u16>,
    pub success: bool,
}

impl Sample {
    pub fn latency_ms(&self) -> f64 {
        duration_ms(self.latency)
    }
}

/// Milliseconds as a float, exact for whole-microsecond durations.
pub fn duration_ms(d: Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}

/// Serialize a `Duration` as fractional milliseconds.
pub fn serialize_millis<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration_ms(*d))
}
