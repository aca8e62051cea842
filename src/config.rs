//! Configuration module for healthtrail.
//!
//! Server settings come from environment variables with sensible defaults.
//! Probe definitions and cadences come from a TOML file and are validated
//! before anything starts: any error here is fatal.

use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::health::HealthSettings;
use crate::probe::{HttpMethod, ProbeDefinition, SuccessPredicate};
use crate::registry::ProbeRegistry;
use crate::scheduler::ScheduleSettings;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate probe name: {0}")]
    DuplicateName(String),
    #[error("probe {name}: invalid target {target:?}: {reason}")]
    InvalidTarget {
        name: String,
        target: String,
        reason: String,
    },
    #[error("invalid success predicate {0:?}")]
    InvalidPredicate(String),
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    #[error("{0}")]
    Invalid(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the JSON API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "healthtrail.db")
    pub db_path: String,
    /// Path to the probe configuration file (default: "healthtrail.toml")
    pub config_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "healthtrail.db".to_string(),
            config_path: "healthtrail.toml".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HEALTHTRAIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `HEALTHTRAIL_DB_PATH`: Database file path (default: "healthtrail.db")
    /// - `HEALTHTRAIL_CONFIG`: Probe file path (default: "healthtrail.toml")
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("HEALTHTRAIL_HTTP_PORT") {
            match port_str.parse() {
                Ok(port) => cfg.http_port = port,
                Err(_) => tracing::warn!("Ignoring invalid HEALTHTRAIL_HTTP_PORT {:?}", port_str),
            }
        }

        if let Ok(db_path) = env::var("HEALTHTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(config_path) = env::var("HEALTHTRAIL_CONFIG") {
            cfg.config_path = config_path;
        }

        cfg
    }
}

fn default_probe_interval_secs() -> u64 {
    300
}

fn default_retention_interval_secs() -> u64 {
    86400
}

fn default_retention_horizon_days() -> u64 {
    7
}

fn default_probe_jitter_ms() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_success() -> String {
    SuccessPredicate::default().to_string()
}

/// Contents of the probe configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    #[serde(default = "default_retention_interval_secs")]
    pub retention_interval_secs: u64,
    #[serde(default = "default_retention_horizon_days")]
    pub retention_horizon_days: u64,
    #[serde(default = "default_probe_jitter_ms")]
    pub probe_jitter_ms: u64,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HealthConfig {
    pub horizon_mins: u64,
    pub uptime_horizon_hours: u64,
    pub series_limit: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            horizon_mins: 240,
            uptime_horizon_hours: 24,
            series_limit: 300,
        }
    }
}

/// One `[[probes]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    pub name: String,
    pub target: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default = "default_success")]
    pub success: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl MonitorConfig {
    /// Read and parse the file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }

    pub fn retention_horizon(&self) -> Duration {
        scaled_secs(self.retention_horizon_days, 86400).unwrap_or(Duration::MAX)
    }

    pub fn probe_jitter(&self) -> Duration {
        Duration::from_millis(self.probe_jitter_ms)
    }

    pub fn schedule_settings(&self) -> ScheduleSettings {
        ScheduleSettings {
            probe_interval: self.probe_interval(),
            retention_interval: self.retention_interval(),
            retention_horizon: self.retention_horizon(),
        }
    }

    pub fn health_settings(&self) -> HealthSettings {
        HealthSettings {
            horizon: scaled_secs(self.health.horizon_mins, 60).unwrap_or(Duration::MAX),
            uptime_horizon: scaled_secs(self.health.uptime_horizon_hours, 3600)
                .unwrap_or(Duration::MAX),
            stale_after: self.probe_interval().saturating_mul(2),
            series_limit: self.health.series_limit,
        }
    }

    /// Check cadences and horizons.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            (self.probe_interval_secs, "probe_interval_secs"),
            (self.retention_interval_secs, "retention_interval_secs"),
            (self.retention_horizon_days, "retention_horizon_days"),
            (self.health.horizon_mins, "health.horizon_mins"),
            (self.health.uptime_horizon_hours, "health.uptime_horizon_hours"),
        ];
        for (value, field) in positive {
            if value == 0 {
                return Err(ConfigError::NonPositive(field));
            }
        }

        let horizons = [
            (self.retention_horizon_days, 86400, "retention_horizon_days"),
            (self.health.horizon_mins, 60, "health.horizon_mins"),
            (self.health.uptime_horizon_hours, 3600, "health.uptime_horizon_hours"),
        ];
        for (value, unit_secs, field) in horizons {
            if scaled_secs(value, unit_secs).is_none() {
                return Err(ConfigError::Invalid(format!("{} is too large", field)));
            }
        }

        if self.health.series_limit < 2 {
            return Err(ConfigError::Invalid(
                "health.series_limit must be at least 2".to_string(),
            ));
        }

        if self.retention_horizon() <= self.probe_interval() {
            return Err(ConfigError::Invalid(
                "retention horizon must be longer than the probe interval".to_string(),
            ));
        }

        if self.probes.is_empty() {
            return Err(ConfigError::Invalid("no probes configured".to_string()));
        }

        Ok(())
    }

    /// Validate everything and build the probe registry.
    pub fn build_registry(&self) -> Result<ProbeRegistry, ConfigError> {
        self.validate()?;

        let mut registry = ProbeRegistry::new();
        for probe in &self.probes {
            // A cycle must finish before the next tick or ticks get skipped
            let timeout = Duration::from_millis(probe.timeout_ms);
            if timeout.saturating_add(self.probe_jitter()) >= self.probe_interval() {
                return Err(ConfigError::Invalid(format!(
                    "probe {}: timeout plus jitter must be shorter than the probe interval",
                    probe.name
                )));
            }

            let definition = ProbeDefinition::new(&probe.name, &probe.target, timeout)?
                .with_method(probe.method)
                .with_success(probe.success.parse()?)
                .with_params(&probe.params);
            registry.register(definition)?;
        }

        Ok(registry)
    }
}

/// `value` units of `unit_secs` seconds, `None` on overflow.
fn scaled_secs(value: u64, unit_secs: u64) -> Option<Duration> {
    value.checked_mul(unit_secs).map(Duration::from_secs)
}
