//! HTTP API for the scraper service
//!
//! Thin surface over the core: trigger endpoints for scrape runs, read-only
//! status and dead-letter endpoints, and the aggregate health endpoint.

pub mod health;
pub mod scrape;
pub mod status;

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use mdp_common::store::{StatusStore, UnroutableMessageStore};

use crate::scrape::{
    DailyPricesScrapeService, IndexConstituentsScrapeService, TickerDirectoryScrapeService,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub status: StatusStore,
    pub unroutable: UnroutableMessageStore,
    pub tickers: Arc<TickerDirectoryScrapeService>,
    pub constituents: Arc<IndexConstituentsScrapeService>,
    pub prices: Arc<DailyPricesScrapeService>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(scrape::routes())
        .merge(status::routes())
        .merge(health::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
