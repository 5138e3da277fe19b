//! HTTP API for the importer service
//!
//! Read-only surface: import statuses, consumer-side dead letters (with
//! operator delete), and the aggregate health endpoint.

pub mod health;
pub mod status;

use axum::Router;
use tower_http::trace::TraceLayer;

use mdp_common::store::{StatusStore, UnprocessableMessageStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub status: StatusStore,
    pub unprocessable: UnprocessableMessageStore,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(status::routes())
        .merge(health::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
