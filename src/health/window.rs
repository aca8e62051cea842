//! Rolling-window latency statistics.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::window_start;
use crate::db::{DbError, Sample, SampleStore};

/// Fewer samples than this and a window reports insufficient data.
pub const MIN_WINDOW_SAMPLES: usize = 2;

/// Direction of the latest latency relative to the first in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    /// Latencies in milliseconds, oldest first. Capped at the newest
    /// `series_limit` points; the other fields cover the whole window.
    pub series: Vec<f64>,
    pub count: usize,
    pub success_count: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// `success_count / count`, always within `0.0..=1.0`.
    pub success_ratio: f64,
    pub trend: Trend,
}

/// Statistics for one window, or a marker that there is not enough data yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Window {
    InsufficientData { samples: usize },
    Ready(WindowStats),
}

impl Window {
    pub fn stats(&self) -> Option<&WindowStats> {
        match self {
            Window::Ready(stats) => Some(stats),
            Window::InsufficientData { .. } => None,
        }
    }
}

/// Summarize chronologically ordered samples.
pub fn summarize(samples: &[Sample], series_limit: usize) -> Window {
    let count = samples.len();
    if count < MIN_WINDOW_SAMPLES {
        return Window::InsufficientData { samples: count };
    }

    let latencies: Vec<f64> = samples.iter().map(Sample::latency_ms).collect();
    let success_count = samples.iter().filter(|s| s.success).count();

    let sum: f64 = latencies.iter().sum();
    let min_ms = latencies.iter().copied().fold(f64::INFINITY, f64::min);
    let max_ms = latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let first = latencies[0];
    let latest = latencies[count - 1];
    let trend = match latest.partial_cmp(&first) {
        Some(Ordering::Greater) => Trend::Rising,
        Some(Ordering::Less) => Trend::Falling,
        _ => Trend::Flat,
    };

    let skip = count.saturating_sub(series_limit.max(MIN_WINDOW_SAMPLES));
    let series = latencies[skip..].to_vec();

    Window::Ready(WindowStats {
        series,
        count,
        success_count,
        mean_ms: sum / count as f64,
        min_ms,
        max_ms,
        success_ratio: success_count as f64 / count as f64,
        trend,
    })
}

/// Computes windows from the sample store on every read.
#[derive(Clone)]
pub struct WindowAggregator {
    store: Arc<dyn SampleStore>,
    series_limit: usize,
}

impl WindowAggregator {
    pub fn new(store: Arc<dyn SampleStore>, series_limit: usize) -> Self {
        Self {
            store,
            series_limit,
        }
    }

    /// Window over `[now - horizon, now]` for `endpoint`.
    pub fn aggregate(&self, endpoint: &str, horizon: Duration) -> Result<Window, DbError> {
        self.aggregate_at(endpoint, horizon, Utc::now())
    }

    pub fn aggregate_at(
        &self,
        endpoint: &str,
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> Result<Window, DbError> {
        let samples: Vec<Sample> = self
            .store
            .query(endpoint, window_start(now, horizon))?
            .into_iter()
            .filter(|s| s.timestamp <= now)
            .collect();

        Ok(summarize(&samples, self.series_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{sample_at, MemoryStore};
    use chrono::Duration as ChronoDuration;

    fn series(latencies: &[u64]) -> Vec<Sample> {
        let start = Utc::now() - ChronoDuration::minutes(latencies.len() as i64);
        latencies
            .iter()
            .enumerate()
            .map(|(i, &ms)| sample_at("svc-a", start + ChronoDuration::minutes(i as i64), ms, true))
            .collect()
    }

    #[test]
    fn test_rising_window() {
        let window = summarize(&series(&[100, 200, 300]), 300);
        let stats = window.stats().unwrap();

        assert_eq!(stats.series, vec![100.0, 200.0, 300.0]);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.mean_ms, 200.0);
        assert_eq!(stats.min_ms, 100.0);
        assert_eq!(stats.max_ms, 300.0);
        assert_eq!(stats.success_ratio, 1.0);
        assert_eq!(stats.trend, Trend::Rising);
    }

    #[test]
    fn test_trend_compares_latest_to_first() {
        let falling = summarize(&series(&[300, 500, 100]), 300);
        assert_eq!(falling.stats().unwrap().trend, Trend::Falling);

        // Dips in the middle do not matter
        let flat = summarize(&series(&[200, 50, 200]), 300);
        assert_eq!(flat.stats().unwrap().trend, Trend::Flat);
    }

    #[test]
    fn test_insufficient_data() {
        assert_eq!(summarize(&[], 300), Window::InsufficientData { samples: 0 });
        assert_eq!(
            summarize(&series(&[120]), 300),
            Window::InsufficientData { samples: 1 }
        );
    }

    #[test]
    fn test_success_ratio() {
        let mut samples = series(&[100, 100, 100, 100]);
        samples[1].success = false;
        samples[3].success = false;

        let stats = summarize(&samples, 300).stats().cloned().unwrap();
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.success_ratio, 0.5);

        for s in samples.iter_mut() {
            s.success = false;
        }
        let ratio = summarize(&samples, 300).stats().unwrap().success_ratio;
        assert!((0.0..=1.0).contains(&ratio));
        assert_eq!(ratio, 0.0);
    }

    #[test]
    fn test_series_limit_keeps_newest_points() {
        let window = summarize(&series(&[10, 20, 30, 40, 50]), 3);
        let stats = window.stats().unwrap();

        assert_eq!(stats.series, vec![30.0, 40.0, 50.0]);
        assert_eq!(stats.count, 5);
        assert_eq!(stats.mean_ms, 30.0);
        assert_eq!(stats.trend, Trend::Rising);
    }

    #[test]
    fn test_aggregate_respects_horizon() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for (minutes_ago, ms) in [(20, 900), (4, 100), (2, 200), (0, 300)] {
            store
                .append(&sample_at("svc-a", now - ChronoDuration::minutes(minutes_ago), ms, true))
                .unwrap();
        }
        // Not yet visible at `now`
        store
            .append(&sample_at("svc-a", now + ChronoDuration::minutes(1), 5000, true))
            .unwrap();

        let aggregator = WindowAggregator::new(store, 300);
        let window = aggregator
            .aggregate_at("svc-a", Duration::from_secs(600), now)
            .unwrap();
        let stats = window.stats().unwrap();
        assert_eq!(stats.series, vec![100.0, 200.0, 300.0]);
        assert_eq!(stats.mean_ms, 200.0);
        assert_eq!(stats.trend, Trend::Rising);

        let empty = aggregator.aggregate("svc-b", Duration::from_secs(600)).unwrap();
        assert_eq!(empty, Window::InsufficientData { samples: 0 });
    }

    #[test]
    fn test_window_serialization() {
        let json = serde_json::to_value(summarize(&[], 300)).unwrap();
        assert_eq!(json["status"], "insufficient_data");
        assert_eq!(json["samples"], 0);

        let json = serde_json::to_value(summarize(&series(&[100, 300]), 300)).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["trend"], "rising");
        assert_eq!(json["mean_ms"], 200.0);
    }
}
