//! In-memory sample store.

use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::{DbError, Sample, SampleStore};

/// In-memory sample store. Contents are lost when it is dropped.
#[derive(Default)]
pub struct MemoryStore {
    samples: RwLock<Vec<Sample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl SampleStore for MemoryStore {
    fn append(&self, sample: &Sample) -> Result<(), DbError> {
        let mut samples = self.samples.write().map_err(|_| DbError::Poisoned)?;
        samples.push(sample.clone());
        Ok(())
    }

    fn query(&self, endpoint: &str, since: DateTime<Utc>) -> Result<Vec<Sample>, DbError> {
        let samples = self.samples.read().map_err(|_| DbError::Poisoned)?;
        let mut matching: Vec<Sample> = samples
            .iter()
            .filter(|s| s.endpoint == endpoint && s.timestamp >= since)
            .cloned()
            .collect();

        // Stable sort keeps insertion order for equal timestamps
        matching.sort_by_key(|s| s.timestamp);
        Ok(matching)
    }

    fn latest_at(&self, endpoint: &str, at: DateTime<Utc>) -> Result<Option<Sample>, DbError> {
        let samples = self.samples.read().map_err(|_| DbError::Poisoned)?;
        Ok(samples
            .iter()
            .filter(|s| s.endpoint == endpoint && s.timestamp <= at)
            .max_by_key(|s| s.timestamp)
            .cloned())
    }

    fn trim_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let mut samples = self.samples.write().map_err(|_| DbError::Poisoned)?;
        let before = samples.len();
        samples.retain(|s| s.timestamp >= cutoff);
        Ok(before - samples.len())
    }
}
