//! Database module for healthtrail.
//!
//! Samples live behind the [`SampleStore`] trait: SQLite with embedded
//! migrations for real runs, an in-memory store for tests.

mod memory;
mod models;
mod store;

pub use memory::*;
pub use models::*;
pub use store::*;

#[cfg(test)]
pub(crate) fn sample_at(
    endpoint: &str,
    timestamp: chrono::DateTime<chrono::Utc>,
    latency_ms: u64,
    success: bool,
) -> Sample {
    Sample {
        endpoint: endpoint.to_string(),
        timestamp,
        latency: std::time::Duration::from_millis(latency_ms),
        status: if success { Some(200) } else { None },
        success,
    }
}
