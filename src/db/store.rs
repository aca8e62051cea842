//! Sample store trait and its SQLite implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Append-only ledger of probe samples.
///
/// Implementations must accept concurrent appends and never reorder,
/// deduplicate or update samples.
pub trait SampleStore: Send + Sync {
    /// Persist one sample.
    fn append(&self, sample: &Sample) -> Result<(), DbError>;

    /// Samples for `endpoint` with `timestamp >= since`, oldest first.
    fn query(&self, endpoint: &str, since: DateTime<Utc>) -> Result<Vec<Sample>, DbError>;

    /// Most recent sample for `endpoint` with `timestamp <= at`.
    fn latest_at(&self, endpoint: &str, at: DateTime<Utc>) -> Result<Option<Sample>, DbError>;

    /// Most recent sample for `endpoint` up to now.
    fn latest(&self, endpoint: &str) -> Result<Option<Sample>, DbError> {
        self.latest_at(endpoint, Utc::now())
    }

    /// Delete samples with `timestamp < cutoff`. Returns the number removed.
    fn trim_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError>;

    /// Delete samples older than `older_than` relative to now.
    fn trim(&self, older_than: Duration) -> Result<usize, DbError> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.trim_before(cutoff)
    }
}

/// SQLite-backed store. The connection is closed when the store is dropped.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::init(Connection::open(path)?)
    }

    fn init(mut conn: Connection) -> Result<Self, DbError> {
        conn.busy_timeout(Duration::from_secs(5))?;

        let report = embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;
        for migration in report.applied_migrations() {
            tracing::info!("Applied migration {}", migration);
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    #[cfg(test)]
    fn count(&self) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM samples", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}

impl SampleStore for SqliteStore {
    fn append(&self, sample: &Sample) -> Result<(), DbError> {
        let latency_us = i64::try_from(sample.latency.as_micros()).unwrap_or(i64::MAX);

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO samples (endpoint, time, latency_us, status, success)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                sample.endpoint,
                format_db_time(sample.timestamp),
                latency_us,
                sample.status,
                sample.success,
            ],
        )?;
        Ok(())
    }

    fn query(&self, endpoint: &str, since: DateTime<Utc>) -> Result<Vec<Sample>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT endpoint, time, latency_us, status, success FROM samples
             WHERE endpoint = ?1 AND time >= ?2 ORDER BY time ASC, id ASC",
        )?;

        let samples = stmt
            .query_map(params![endpoint, format_db_time(since)], row_to_sample)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(samples)
    }

    fn latest_at(&self, endpoint: &str, at: DateTime<Utc>) -> Result<Option<Sample>, DbError> {
        let conn = self.conn()?;
        let sample = conn
            .query_row(
                "SELECT endpoint, time, latency_us, status, success FROM samples
                 WHERE endpoint = ?1 AND time <= ?2 ORDER BY time DESC, id DESC LIMIT 1",
                params![endpoint, format_db_time(at)],
                row_to_sample,
            )
            .optional()?;
        Ok(sample)
    }

    fn trim_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM samples WHERE time < ?1",
            params![format_db_time(cutoff)],
        )?;
        Ok(deleted)
    }
}

fn row_to_sample(row: &Row<'_>) -> SqlResult<Sample> {
    let time: String = row.get(1)?;
    let timestamp = parse_db_time(&time).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("invalid timestamp {:?}", time).into(),
        )
    })?;
    let latency_us: i64 = row.get(2)?;

    Ok(Sample {
        endpoint: row.get(0)?,
        timestamp,
        latency: Duration::from_micros(latency_us.max(0) as u64),
        status: row.get(3)?,
        success: row.get(4)?,
    })
}

/// Fixed-width text timestamps sort chronologically.
fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = ["%Y-%m-%d %H:%M:%S%.9f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sample_at;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn temp_store() -> (NamedTempFile, SqliteStore) {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteStore::new(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_append_and_query_in_order() {
        let (_tmp, store) = temp_store();
        let now = Utc::now();

        // Appended out of order on purpose
        store.append(&sample_at("svc-a", now - ChronoDuration::minutes(1), 300, true)).unwrap();
        store.append(&sample_at("svc-a", now - ChronoDuration::minutes(5), 100, true)).unwrap();
        store.append(&sample_at("svc-a", now - ChronoDuration::minutes(3), 200, false)).unwrap();
        store.append(&sample_at("svc-b", now, 50, true)).unwrap();

        let samples = store.query("svc-a", now - ChronoDuration::minutes(10)).unwrap();
        let latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms()).collect();
        assert_eq!(latencies, vec![100.0, 200.0, 300.0]);
        assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(samples.iter().all(|s| s.endpoint == "svc-a"));
        assert_eq!(samples[1].status, None);
        assert!(!samples[1].success);

        let recent = store.query("svc-a", now - ChronoDuration::minutes(2)).unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let (_tmp, store) = temp_store();
        let sample = Sample {
            endpoint: "svc-a".to_string(),
            timestamp: Utc::now(),
            latency: Duration::from_micros(150_250),
            status: Some(503),
            success: false,
        };
        store.append(&sample).unwrap();

        let fetched = store.latest("svc-a").unwrap().unwrap();
        assert_eq!(fetched, sample);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let (_tmp, store) = temp_store();
        let sample = sample_at("svc-a", Utc::now(), 100, true);
        store.append(&sample).unwrap();
        store.append(&sample).unwrap();

        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_query_empty_range() {
        let (_tmp, store) = temp_store();
        assert!(store.query("svc-a", Utc::now()).unwrap().is_empty());
        assert!(store.latest("svc-a").unwrap().is_none());
    }

    #[test]
    fn test_latest_picks_newest() {
        let (_tmp, store) = temp_store();
        let now = Utc::now();
        store.append(&sample_at("svc-a", now, 120, true)).unwrap();
        store.append(&sample_at("svc-a", now - ChronoDuration::minutes(5), 80, true)).unwrap();

        let latest = store.latest("svc-a").unwrap().unwrap();
        assert_eq!(latest.latency_ms(), 120.0);
    }

    #[test]
    fn test_latest_at_ignores_later_samples() {
        let (_tmp, store) = temp_store();
        let now = Utc::now();
        store.append(&sample_at("svc-a", now - ChronoDuration::minutes(5), 80, true)).unwrap();
        store.append(&sample_at("svc-a", now + ChronoDuration::minutes(5), 120, true)).unwrap();

        let at_now = store.latest_at("svc-a", now).unwrap().unwrap();
        assert_eq!(at_now.latency_ms(), 80.0);
        assert_eq!(store.latest("svc-a").unwrap().unwrap().latency_ms(), 80.0);
        assert!(store.latest_at("svc-a", now - ChronoDuration::hours(1)).unwrap().is_none());
    }

    #[test]
    fn test_trim_drops_old_samples() {
        let (_tmp, store) = temp_store();
        let now = Utc::now();
        store.append(&sample_at("svc-a", now - ChronoDuration::days(10), 100, true)).unwrap();
        store.append(&sample_at("svc-a", now - ChronoDuration::hours(1), 200, true)).unwrap();

        let seven_days = Duration::from_secs(7 * 86400);
        assert_eq!(store.trim(seven_days).unwrap(), 1);

        let remaining = store.query("svc-a", now - ChronoDuration::days(30)).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].latency_ms(), 200.0);

        // Second trim is a no-op
        assert_eq!(store.trim(seven_days).unwrap(), 0);
        assert_eq!(store.query("svc-a", now - ChronoDuration::days(30)).unwrap(), remaining);
    }

    #[test]
    fn test_concurrent_appends_all_retained() {
        let (_tmp, store) = temp_store();
        let store = Arc::new(store);
        let now = Utc::now();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        let ts = now + ChronoDuration::milliseconds(j);
                        store.append(&sample_at(&format!("svc-{}", i), ts, 10, true)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.count().unwrap(), 100);
        for i in 0..4 {
            let samples = store.query(&format!("svc-{}", i), now).unwrap();
            assert_eq!(samples.len(), 25);
        }
    }

    #[test]
    fn test_reopen_keeps_data() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let store = SqliteStore::new(tmp.path()).unwrap();
            store.append(&sample_at("svc-a", Utc::now(), 100, true)).unwrap();
        }

        let store = SqliteStore::new(tmp.path()).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_parse_db_time() {
        let now = Utc::now();
        assert_eq!(parse_db_time(&format_db_time(now)), Some(now));
        assert!(parse_db_time("2024-01-01 12:00:00").is_some());
        assert!(parse_db_time("yesterday").is_none());
    }
}
