//! Aggregate health endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: Health,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub unprocessable_messages: usize,
}

/// Create the health route
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// GET /health
///
/// Recorded import errors or unprocessable messages mean unhealthy,
/// warnings mean degraded, anything else is healthy.
async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let errors: Vec<String> = state
        .status
        .errors()
        .into_iter()
        .map(|s| format!("{}: {}", s.service_procedure, s.detail))
        .collect();
    let warnings: Vec<String> = state
        .status
        .warnings()
        .into_iter()
        .map(|s| format!("{}: {}", s.service_procedure, s.detail))
        .collect();
    let unprocessable_messages = state.unprocessable.entries().len();

    let status = if !errors.is_empty() || unprocessable_messages > 0 {
        Health::Unhealthy
    } else if !warnings.is_empty() {
        Health::Degraded
    } else {
        Health::Healthy
    };

    Json(HealthReport {
        status,
        errors,
        warnings,
        unprocessable_messages,
    })
}
