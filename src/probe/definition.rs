//! Probe definitions and success predicates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::ConfigError;
use crate::db::serialize_millis;

/// HTTP method used to reach a probe target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Get,
    /// HEAD, retried as GET when the server rejects HEAD.
    Head,
}

/// Rule mapping a transport outcome to success or failure.
///
/// A transport error (no status) is always a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessPredicate {
    /// Any status strictly below the bound.
    Below(u16),
    /// Inclusive status range.
    Range { min: u16, max: u16 },
    /// Exact status codes.
    OneOf(Vec<u16>),
}

impl Default for SuccessPredicate {
    fn default() -> Self {
        Self::Below(400)
    }
}

impl SuccessPredicate {
    pub fn evaluate(&self, status: Option<u16>) -> bool {
        let Some(status) = status else {
            return false;
        };

        match self {
            Self::Below(bound) => status < *bound,
            Self::Range { min, max } => (*min..=*max).contains(&status),
            Self::OneOf(codes) => codes.contains(&status),
        }
    }
}

impl FromStr for SuccessPredicate {
    type Err = ConfigError;

    /// Accepts `<400`, `2xx`, `200-299` and `200,204`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::InvalidPredicate(s.to_string());

        if let Some(bound) = s.strip_prefix('<') {
            let bound: u16 = bound.trim().parse().map_err(|_| invalid())?;
            return Ok(Self::Below(bound));
        }

        if let Some(class) = s.strip_suffix("xx") {
            let class: u16 = class.parse().map_err(|_| invalid())?;
            if !(1..=5).contains(&class) {
                return Err(invalid());
            }
            return Ok(Self::Range {
                min: class * 100,
                max: class * 100 + 99,
            });
        }

        if let Some((min, max)) = s.split_once('-') {
            let min: u16 = min.trim().parse().map_err(|_| invalid())?;
            let max: u16 = max.trim().parse().map_err(|_| invalid())?;
            if min > max {
                return Err(invalid());
            }
            return Ok(Self::Range { min, max });
        }

        let codes = s
            .split(',')
            .map(|code| code.trim().parse::<u16>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        if codes.is_empty() {
            return Err(invalid());
        }
        Ok(Self::OneOf(codes))
    }
}

impl fmt::Display for SuccessPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Below(bound) => write!(f, "<{}", bound),
            Self::Range { min, max } if min % 100 == 0 && min.checked_add(99) == Some(*max) => {
                write!(f, "{}xx", min / 100)
            }
            Self::Range { min, max } => write!(f, "{}-{}", min, max),
            Self::OneOf(codes) => {
                let codes: Vec<String> = codes.iter().map(u16::to_string).collect();
                write!(f, "{}", codes.join(","))
            }
        }
    }
}

impl Serialize for SuccessPredicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A monitored endpoint. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeDefinition {
    name: String,
    target: String,
    #[serde(rename = "timeout_ms", serialize_with = "serialize_millis")]
    timeout: Duration,
    method: HttpMethod,
    success: SuccessPredicate,
    /// Target plus query parameters. Parameters may carry API keys, so only
    /// the bare target is serialized.
    #[serde(skip)]
    url: Url,
}

impl ProbeDefinition {
    /// Build a definition, validating name, target and timeout.
    pub fn new(name: &str, target: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::Invalid("probe name cannot be empty".to_string()));
        }

        let invalid_target = |reason: &str| ConfigError::InvalidTarget {
            name: name.to_string(),
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(target).map_err(|e| invalid_target(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid_target("scheme must be http or https"));
        }
        if url.host_str().is_none() {
            return Err(invalid_target("missing host"));
        }

        if timeout.is_zero() {
            return Err(ConfigError::NonPositive("probe timeout"));
        }

        Ok(Self {
            name: name.to_string(),
            target: target.to_string(),
            timeout,
            method: HttpMethod::default(),
            success: SuccessPredicate::default(),
            url,
        })
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_success(mut self, success: SuccessPredicate) -> Self {
        self.success = success;
        self
    }

    /// Append query parameters to the request URL.
    pub fn with_params(mut self, params: &BTreeMap<String, String>) -> Self {
        if !params.is_empty() {
            self.url.query_pairs_mut().extend_pairs(params.iter());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn success(&self) -> &SuccessPredicate {
        &self.success
    }

    /// Full request URL including query parameters.
    pub fn url(&self) -> &Url {
        &self.url
    }
}
