//! Read interface for the presentation layer.
//!
//! Every registered endpoint always has a status: live stats, stale data, no
//! data yet, or unavailable when its samples could not be read.

mod window;

pub use window::*;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::db::{DbError, Sample, SampleStore};
use crate::registry::ProbeRegistry;

#[derive(Error, Debug)]
pub enum HealthError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
    #[error(transparent)]
    Store(#[from] DbError),
}

/// Horizons used when reporting health.
#[derive(Debug, Clone)]
pub struct HealthSettings {
    /// Lookback for window statistics.
    pub horizon: Duration,
    /// Lookback for the uptime ratio.
    pub uptime_horizon: Duration,
    /// Data older than this is stale, normally twice the probe interval.
    pub stale_after: Duration,
    /// Maximum points in a window's latency series.
    pub series_limit: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            horizon: Duration::from_secs(4 * 3600),
            uptime_horizon: Duration::from_secs(24 * 3600),
            stale_after: Duration::from_secs(2 * 300),
            series_limit: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Live,
    Stale,
    NoData,
    /// The store failed while reading this endpoint.
    Unavailable,
}

/// Health of one endpoint at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub state: HealthState,
    pub latest: Option<Sample>,
    pub window: Window,
    /// Success ratio over the uptime horizon, `None` without samples.
    pub uptime: Option<f64>,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EndpointHealth {
    fn unavailable(endpoint: &str, checked_at: DateTime<Utc>, error: &HealthError) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            state: HealthState::Unavailable,
            latest: None,
            window: Window::InsufficientData { samples: 0 },
            uptime: None,
            checked_at,
            error: Some(error.to_string()),
        }
    }
}

pub struct HealthMonitor {
    registry: Arc<ProbeRegistry>,
    store: Arc<dyn SampleStore>,
    aggregator: WindowAggregator,
    settings: HealthSettings,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ProbeRegistry>,
        store: Arc<dyn SampleStore>,
        settings: HealthSettings,
    ) -> Self {
        let aggregator = WindowAggregator::new(store.clone(), settings.series_limit);
        Self {
            registry,
            store,
            aggregator,
            settings,
        }
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    pub fn get_health(&self, endpoint: &str) -> Result<EndpointHealth, HealthError> {
        self.get_health_at(endpoint, Utc::now())
    }

    pub fn get_health_at(
        &self,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<EndpointHealth, HealthError> {
        self.ensure_registered(endpoint)?;

        let latest = self.store.latest_at(endpoint, now)?;
        let state = match &latest {
            None => HealthState::NoData,
            Some(sample) if now - sample.timestamp > stale_limit(self.settings.stale_after) => {
                HealthState::Stale
            }
            Some(_) => HealthState::Live,
        };

        let window = self
            .aggregator
            .aggregate_at(endpoint, self.settings.horizon, now)?;

        let uptime_samples: Vec<Sample> = self
            .store
            .query(endpoint, window_start(now, self.settings.uptime_horizon))?
            .into_iter()
            .filter(|s| s.timestamp <= now)
            .collect();
        let uptime = if uptime_samples.is_empty() {
            None
        } else {
            let ok = uptime_samples.iter().filter(|s| s.success).count();
            Some(ok as f64 / uptime_samples.len() as f64)
        };

        Ok(EndpointHealth {
            endpoint: endpoint.to_string(),
            state,
            latest,
            window,
            uptime,
            checked_at: now,
            error: None,
        })
    }

    /// Health of every registered endpoint, in registration order.
    pub fn get_all(&self) -> Vec<EndpointHealth> {
        self.get_all_at(Utc::now())
    }

    /// A store failure marks only the affected endpoint unavailable.
    pub fn get_all_at(&self, now: DateTime<Utc>) -> Vec<EndpointHealth> {
        self.registry
            .list()
            .iter()
            .map(|def| {
                self.get_health_at(def.name(), now).unwrap_or_else(|e| {
                    tracing::error!("Health check for {} failed: {}", def.name(), e);
                    EndpointHealth::unavailable(def.name(), now, &e)
                })
            })
            .collect()
    }

    /// Raw samples for a registered endpoint since `since`.
    pub fn samples(
        &self,
        endpoint: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Sample>, HealthError> {
        self.ensure_registered(endpoint)?;
        Ok(self.store.query(endpoint, since)?)
    }

    fn ensure_registered(&self, endpoint: &str) -> Result<(), HealthError> {
        if self.registry.contains(endpoint) {
            Ok(())
        } else {
            Err(HealthError::UnknownEndpoint(endpoint.to_string()))
        }
    }
}

/// Start of the window `[now - horizon, now]`, saturating for huge horizons.
pub(crate) fn window_start(now: DateTime<Utc>, horizon: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(horizon)
        .ok()
        .and_then(|h| now.checked_sub_signed(h))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn stale_limit(stale_after: Duration) -> chrono::Duration {
    chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::MAX)
}
