//! Status and dead-letter routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use mdp_common::store::UnroutableMessage;
use mdp_common::types::{ServiceProcedureStatus, Status};

use super::AppState;

/// Optional severity filter for status reads
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

/// A dead letter together with its delete key
#[derive(Debug, Serialize)]
pub struct UnroutableEntry {
    pub key: String,
    #[serde(flatten)]
    pub message: UnroutableMessage,
}

/// Create status and dead-letter routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/status/latest", get(latest_statuses))
        .route("/api/unroutable", get(unroutable_messages))
        .route("/api/unroutable/:key", delete(delete_unroutable_message))
}

/// Get latest statuses for scrape service procedures
///
/// GET /api/status/latest?status=success|warning|error
async fn latest_statuses(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<ServiceProcedureStatus>>, StatusCode> {
    match query.status.as_deref() {
        None => Ok(Json(state.status.get_all())),
        Some(filter) => {
            let status = parse_status_filter(filter).ok_or(StatusCode::BAD_REQUEST)?;
            Ok(Json(state.status.by_status(status)))
        }
    }
}

/// Get latest unroutable messages
///
/// GET /api/unroutable
async fn unroutable_messages(State(state): State<AppState>) -> Json<Vec<UnroutableEntry>> {
    let entries = state
        .unroutable
        .entries()
        .into_iter()
        .map(|(key, message)| UnroutableEntry { key, message })
        .collect();
    Json(entries)
}

/// Delete an unroutable message by its content key
///
/// DELETE /api/unroutable/:key
async fn delete_unroutable_message(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> StatusCode {
    if state.unroutable.delete(&key) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

pub(crate) fn parse_status_filter(filter: &str) -> Option<Status> {
    match filter.to_lowercase().as_str() {
        "information" => Some(Status::Information),
        "success" => Some(Status::Success),
        "warning" => Some(Status::Warning),
        "error" => Some(Status::Error),
        _ => None,
    }
}
