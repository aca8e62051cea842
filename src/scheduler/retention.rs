//! Retention manager for cleaning up old samples.

use std::sync::Arc;
use std::time::Duration;

use crate::db::SampleStore;

/// Deletes samples older than the retention horizon.
pub struct RetentionManager {
    store: Arc<dyn SampleStore>,
    horizon: Duration,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn SampleStore>, horizon: Duration) -> Self {
        Self { store, horizon }
    }

    /// Run one trim. Failures are logged and retried on the next cycle.
    pub fn process(&self) -> Option<usize> {
        match self.store.trim(self.horizon) {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::info!(
                        "RetentionManager: Deleted {} samples older than {:?}",
                        deleted,
                        self.horizon
                    );
                }
                Some(deleted)
            }
            Err(e) => {
                tracing::error!("RetentionManager: Failed to trim samples: {}", e);
                None
            }
        }
    }
}
