//! MDP Scraper Service Library
//!
//! Producer side of the market data pipeline: scrapes external data sources
//! and reliably hands the results to the message broker.
//!
//! # Overview
//!
//! - **Scrapers**: ticker directories (FTP), index constituents (HTTPS CSV),
//!   daily prices (HTTPS CSV driven by a database watchlist)
//! - **Publish coordinator**: owns the broker channel, publishes with
//!   confirms enabled, and tracks every message until its terminal signal
//! - **API**: HTTP triggers for scrape runs plus read-only status,
//!   dead-letter, and health endpoints
//!
//! Scrape runs never publish directly: they enqueue envelopes with the
//! coordinator and report their own progress to the status store. Failures
//! surface exclusively through the status and dead-letter read endpoints.

pub mod api;
pub mod config;
pub mod publish;
pub mod scrape;

pub use config::Config;
