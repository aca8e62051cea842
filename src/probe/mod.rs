//! Probe module for endpoint health checks.
//!
//! A [`Prober`] runs one definition through a [`Transport`] and turns every
//! outcome, including timeouts and connection errors, into a [`Sample`].

mod definition;
mod http;

pub use definition::*;
pub use http::*;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;

use crate::db::Sample;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A response that made it back, whatever its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
}

/// Issues the request behind a probe.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, definition: &ProbeDefinition) -> Result<TransportResponse, ProbeError>;
}

/// Executes health checks and classifies their outcome.
pub struct Prober {
    transport: Arc<dyn Transport>,
    jitter: Duration,
}

impl Prober {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            jitter: Duration::ZERO,
        }
    }

    /// Delay each probe by a random amount up to `jitter` to avoid a
    /// thundering herd at the start of a cycle.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Run one probe.
    ///
    /// Network failures never surface as errors: they become a sample with
    /// `success = false`, no status, and latency equal to the timeout. Only
    /// [`ProbeError::Config`] is returned.
    pub async fn probe(&self, definition: &ProbeDefinition) -> Result<Sample, ProbeError> {
        if !self.jitter.is_zero() {
            let jitter = rand::random::<u64>() % (self.jitter.as_millis() as u64 + 1);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        let timeout = definition.timeout();
        let timestamp = Utc::now();
        let start = Instant::now();

        let outcome = match tokio::time::timeout(timeout, self.transport.execute(definition)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };
        let elapsed = start.elapsed().min(timeout);

        let (latency, status) = match outcome {
            Ok(response) => (elapsed, Some(response.status)),
            Err(ProbeError::Config(msg)) => return Err(ProbeError::Config(msg)),
            Err(e) => {
                tracing::warn!(
                    "Probe {} ({}) failed: {}",
                    definition.name(),
                    definition.target(),
                    e
                );
                (timeout, None)
            }
        };

        let success = definition.success().evaluate(status);
        tracing::debug!(
            "Probe {}: {:?} status={:?} success={}",
            definition.name(),
            latency,
            status,
            success
        );

        Ok(Sample {
            endpoint: definition.name().to_string(),
            timestamp,
            latency,
            status,
            success,
        })
    }
}
