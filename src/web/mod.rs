//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::health::HealthMonitor;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub monitor: Arc<HealthMonitor>,
}

/// Read-only JSON API over endpoint health.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, monitor: Arc<HealthMonitor>) -> Self {
        Self {
            state: AppState { config, monitor },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/healthz", get(handlers::handle_healthz))
            .route("/api/health", get(handlers::handle_get_health))
            .route("/api/health/{name}", get(handlers::handle_get_endpoint_health))
            .route("/api/samples", get(handlers::handle_get_samples))
            .route("/api/probes", get(handlers::handle_get_probes))
            .route("/api/probes/{name}", get(handlers::handle_get_probe))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `stop_rx` fires.
    pub async fn start(
        &self,
        mut stop_rx: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{sample_at, MemoryStore, SampleStore};
    use crate::health::HealthSettings;
    use crate::probe::ProbeDefinition;
    use crate::registry::ProbeRegistry;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tower::ServiceExt;

    fn server() -> (Arc<MemoryStore>, Server) {
        let mut params = BTreeMap::new();
        params.insert("apikey".to_string(), "secret".to_string());

        let mut registry = ProbeRegistry::new();
        for name in ["svc-a", "svc-b"] {
            let timeout = Duration::from_secs(2);
            let def = ProbeDefinition::new(name, "https://example.com/status", timeout)
                .unwrap()
                .with_params(&params);
            registry.register(def).unwrap();
        }

        let store = Arc::new(MemoryStore::new());
        let settings = HealthSettings::default();
        let monitor = HealthMonitor::new(Arc::new(registry), store.clone(), settings);
        (store, Server::new(ServerConfig::default(), Arc::new(monitor)))
    }

    async fn get(server: &Server, uri: &str) -> (StatusCode, Value) {
        let response = server
            .routes()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_lists_every_endpoint() {
        let (store, server) = server();
        let now = Utc::now();
        for (minutes_ago, ms) in [(10, 100), (5, 200), (0, 300)] {
            store
                .append(&sample_at("svc-a", now - ChronoDuration::minutes(minutes_ago), ms, true))
                .unwrap();
        }

        let (status, body) = get(&server, "/api/health").await;
        assert_eq!(status, StatusCode::OK);

        let endpoints = body.as_array().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0]["endpoint"], "svc-a");
        assert_eq!(endpoints[0]["state"], "live");
        assert_eq!(endpoints[0]["window"]["status"], "ready");
        assert_eq!(endpoints[0]["window"]["mean_ms"], 200.0);
        assert_eq!(endpoints[0]["window"]["trend"], "rising");
        assert_eq!(endpoints[0]["latest"]["latency_ms"], 300.0);
        assert_eq!(endpoints[1]["state"], "no_data");
        assert_eq!(endpoints[1]["window"]["status"], "insufficient_data");
    }

    #[tokio::test]
    async fn test_single_endpoint_and_unknown() {
        let (_store, server) = server();

        let (status, body) = get(&server, "/api/health/svc-b").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["endpoint"], "svc-b");

        let (status, _) = get(&server, "/api/health/svc-z").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_samples_endpoint() {
        let (store, server) = server();
        let now = Utc::now();
        store.append(&sample_at("svc-a", now - ChronoDuration::days(2), 100, true)).unwrap();
        store.append(&sample_at("svc-a", now, 200, false)).unwrap();

        // Defaults to the health horizon
        let (status, body) = get(&server, "/api/samples?endpoint=svc-a").await;
        assert_eq!(status, StatusCode::OK);
        let samples = body.as_array().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0]["success"], false);
        assert_eq!(samples[0]["status"], Value::Null);

        let (status, body) =
            get(&server, "/api/samples?endpoint=svc-a&since=2000-01-01T00:00:00Z").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, _) = get(&server, "/api/samples?endpoint=svc-a&since=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(&server, "/api/samples?endpoint=svc-z").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_probes_hide_params() {
        let (_store, server) = server();
        let (status, body) = get(&server, "/api/probes").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "svc-a");
        assert_eq!(body[0]["timeout_ms"], 2000.0);
        assert!(!body.to_string().contains("secret"));

        let (status, body) = get(&server, "/api/probes/svc-b").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"], "https://example.com/status");
        assert!(!body.to_string().contains("secret"));

        let (status, _) = get(&server, "/api/probes/svc-z").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_healthz() {
        let (_store, server) = server();
        let response = server
            .routes()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
