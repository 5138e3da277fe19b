//! Scrape trigger routes
//!
//! Each trigger starts a run in the background and returns immediately; a
//! second trigger while one run is in progress reports "already running"
//! without starting anything. Run outcomes are observed through the status
//! endpoints, not through these responses.

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use super::AppState;

/// Reply for a trigger call
#[derive(Debug, Serialize)]
pub struct ScrapeReply {
    pub message: String,
}

/// Create scrape trigger routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/scrape/tickers/listed", post(scrape_listed))
        .route("/api/scrape/tickers/other-listed", post(scrape_other_listed))
        .route("/api/scrape/constituents", post(scrape_constituents))
        .route("/api/scrape/daily-prices", post(scrape_daily_prices))
}

/// Trigger a listed-symbols directory scrape
///
/// POST /api/scrape/tickers/listed
async fn scrape_listed(State(state): State<AppState>) -> Json<ScrapeReply> {
    let message = state.tickers.trigger_scrape_listed();
    Json(ScrapeReply {
        message: message.to_string(),
    })
}

/// Trigger an other-listed-symbols directory scrape
///
/// POST /api/scrape/tickers/other-listed
async fn scrape_other_listed(State(state): State<AppState>) -> Json<ScrapeReply> {
    let message = state.tickers.trigger_scrape_other_listed();
    Json(ScrapeReply {
        message: message.to_string(),
    })
}

/// Trigger an index constituents scrape
///
/// POST /api/scrape/constituents
async fn scrape_constituents(State(state): State<AppState>) -> Json<ScrapeReply> {
    let message = state.constituents.trigger_scrape_constituents();
    Json(ScrapeReply {
        message: message.to_string(),
    })
}

/// Trigger a daily prices scrape
///
/// POST /api/scrape/daily-prices
async fn scrape_daily_prices(State(state): State<AppState>) -> Json<ScrapeReply> {
    let message = state.prices.trigger_scrape_daily_prices();
    Json(ScrapeReply {
        message: message.to_string(),
    })
}
