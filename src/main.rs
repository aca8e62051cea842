//! healthtrail - API health telemetry collector
//!
//! Probes a fixed set of HTTP endpoints on a schedule, keeps the samples in
//! SQLite and serves rolling-window health over a JSON API.

mod config;
mod db;
mod health;
mod probe;
mod registry;
mod scheduler;
mod web;

use config::{MonitorConfig, ServerConfig};
use db::{MemoryStore, SampleStore, SqliteStore};
use health::HealthMonitor;
use probe::{HttpTransport, Prober};
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("healthtrail=info".parse()?))
        .init();

    // Load configuration; any error here stops startup
    let cfg = ServerConfig::load();
    tracing::info!("Loading probes from {}", cfg.config_path);
    let monitor_cfg = MonitorConfig::load(&cfg.config_path)?;
    let registry = Arc::new(monitor_cfg.build_registry()?);
    tracing::info!("Registered {} probes", registry.len());

    // Initialize database
    let store: Arc<dyn SampleStore> = if cfg.db_path == ":memory:" {
        tracing::warn!("Using in-memory store, samples will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        tracing::info!("Using database at {}", cfg.db_path);
        Arc::new(SqliteStore::new(&cfg.db_path)?)
    };

    let prober = Prober::new(Arc::new(HttpTransport::new()?))
        .with_jitter(monitor_cfg.probe_jitter());
    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        prober,
        store.clone(),
        monitor_cfg.schedule_settings(),
    ));
    let monitor = Arc::new(HealthMonitor::new(
        registry,
        store,
        monitor_cfg.health_settings(),
    ));

    let (stop_tx, _) = broadcast::channel(1);

    let scheduler_stop = stop_tx.subscribe();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_stop).await });

    let signal_tx = stop_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                let _ = signal_tx.send(());
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    // Start web server
    let server = Server::new(cfg, monitor);
    let result = server.start(stop_tx.subscribe()).await;

    // Make sure the scheduler stops even if the server failed
    let _ = stop_tx.send(());
    scheduler_task.await?;
    tracing::info!("healthtrail stopped");

    result
}
