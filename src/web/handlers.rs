//! HTTP request handlers.

use super::AppState;
use crate::health::{window_start, HealthError};
use crate::probe::ProbeDefinition;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

fn health_error_response(e: HealthError) -> Response {
    match &e {
        HealthError::UnknownEndpoint(_) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        HealthError::Store(_) => {
            tracing::error!("Health query failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub async fn handle_healthz() -> impl IntoResponse {
    "ok"
}

// ============================================================================
// API: Health
// ============================================================================

pub async fn handle_get_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.get_all())
}

pub async fn handle_get_endpoint_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.monitor.get_health(&name) {
        Ok(health) => Json(health).into_response(),
        Err(e) => health_error_response(e),
    }
}

// ============================================================================
// API: Samples
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SamplesQuery {
    pub endpoint: String,
    /// RFC 3339 lower bound, defaults to the start of the health window.
    #[serde(default)]
    pub since: Option<String>,
}

pub async fn handle_get_samples(
    State(state): State<AppState>,
    Query(query): Query<SamplesQuery>,
) -> impl IntoResponse {
    let since = match query.since.as_deref() {
        Some(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => return (StatusCode::BAD_REQUEST, "Invalid since timestamp").into_response(),
        },
        None => window_start(Utc::now(), state.monitor.settings().horizon),
    };

    match state.monitor.samples(&query.endpoint, since) {
        Ok(samples) => Json(samples).into_response(),
        Err(e) => health_error_response(e),
    }
}

// ============================================================================
// API: Probes
// ============================================================================

pub async fn handle_get_probes(State(state): State<AppState>) -> impl IntoResponse {
    let probes: Vec<&ProbeDefinition> = state
        .monitor
        .registry()
        .list()
        .iter()
        .map(|def| def.as_ref())
        .collect();

    Json(probes).into_response()
}

pub async fn handle_get_probe(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.monitor.registry().get(&name) {
        Some(def) => Json(def.as_ref()).into_response(),
        None => health_error_response(HealthError::UnknownEndpoint(name)),
    }
}
