//! Scheduler module for running probe cycles and retention.

mod retention;

pub use retention::*;

use crate::db::SampleStore;
use crate::probe::{ProbeDefinition, Prober};
use crate::registry::ProbeRegistry;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Cadences for the two periodic triggers.
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub probe_interval: Duration,
    pub retention_interval: Duration,
    /// Samples older than this are trimmed.
    pub retention_horizon: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(300),
            retention_interval: Duration::from_secs(86400),
            retention_horizon: Duration::from_secs(7 * 86400),
        }
    }
}

/// Summary of one probe cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Samples persisted.
    pub recorded: usize,
    /// Persisted samples with `success = false`.
    pub failed_probes: usize,
    /// Samples lost to store errors or probe faults.
    pub dropped: usize,
}

enum ProbeOutcome {
    Recorded { success: bool },
    Dropped,
}

/// The scheduler that drives probe cycles and retention.
pub struct Scheduler {
    registry: Arc<ProbeRegistry>,
    prober: Arc<Prober>,
    store: Arc<dyn SampleStore>,
    retention_manager: RetentionManager,
    settings: ScheduleSettings,
}

impl Scheduler {
    pub fn new(
        registry: Arc<ProbeRegistry>,
        prober: Prober,
        store: Arc<dyn SampleStore>,
        settings: ScheduleSettings,
    ) -> Self {
        let retention_manager = RetentionManager::new(store.clone(), settings.retention_horizon);

        Self {
            registry,
            prober: Arc::new(prober),
            store,
            retention_manager,
            settings,
        }
    }

    /// Probe every registered endpoint concurrently and store the samples.
    ///
    /// Each probe is bounded by its own timeout, so a hung endpoint delays
    /// the cycle by at most that timeout.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut tasks = JoinSet::new();

        for definition in self.registry.list() {
            let definition = definition.clone();
            let prober = self.prober.clone();
            let store = self.store.clone();

            tasks.spawn(async move { record_probe(&prober, store.as_ref(), &definition).await });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ProbeOutcome::Recorded { success }) => {
                    report.recorded += 1;
                    if !success {
                        report.failed_probes += 1;
                    }
                }
                Ok(ProbeOutcome::Dropped) => report.dropped += 1,
                Err(e) => {
                    tracing::error!("Probe task failed: {}", e);
                    report.dropped += 1;
                }
            }
        }

        tracing::info!(
            "Scheduler: cycle complete, {} recorded ({} failed), {} dropped",
            report.recorded,
            report.failed_probes,
            report.dropped
        );
        report
    }

    /// Run until `stop_rx` fires. A cycle in flight when the stop arrives
    /// finishes first.
    pub async fn run(&self, mut stop_rx: broadcast::Receiver<()>) {
        tracing::info!(
            "Starting scheduler with {} targets every {:?}",
            self.registry.len(),
            self.settings.probe_interval
        );

        if self.registry.is_empty() {
            tracing::warn!("Scheduler: no probes registered, cycles will record nothing");
        }

        let mut probe_tick = tokio::time::interval(self.settings.probe_interval);
        probe_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut retention_tick = tokio::time::interval(self.settings.retention_interval);
        retention_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.recv() => {
                    tracing::info!("Scheduler: stopping");
                    break;
                }
                _ = probe_tick.tick() => {
                    self.run_cycle().await;
                }
                _ = retention_tick.tick() => {
                    self.retention_manager.process();
                }
            }
        }
    }
}

async fn record_probe(
    prober: &Prober,
    store: &dyn SampleStore,
    definition: &ProbeDefinition,
) -> ProbeOutcome {
    let sample = match prober.probe(definition).await {
        Ok(sample) => sample,
        Err(e) => {
            tracing::error!("Probe failed for {}: {}", definition.name(), e);
            return ProbeOutcome::Dropped;
        }
    };

    match store.append(&sample) {
        Ok(()) => ProbeOutcome::Recorded {
            success: sample.success,
        },
        Err(e) => {
            tracing::error!("Failed to store sample for {}: {}", definition.name(), e);
            ProbeOutcome::Dropped
        }
    }
}
