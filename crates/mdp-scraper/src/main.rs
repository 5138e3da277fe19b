//! MDP Scraper - Main entry point

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

use mdp_common::logging::{init_logging, LogConfig};
use mdp_common::shutdown;
use mdp_common::store::{StatusStore, UnroutableMessageStore};

use mdp_scraper::api::{self, AppState};
use mdp_scraper::config::Config;
use mdp_scraper::publish::{LapinPublishTransport, PublishCoordinator};
use mdp_scraper::scrape::{
    DailyPricesScrapeService, IndexConstituentsScrapeService, TickerDirectoryScrapeService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::from_env()?
        .with_file_prefix("mdp-scraper")
        .with_filter_directives("mdp_scraper=debug,tower_http=debug,lapin=info,sqlx=info");
    init_logging(&log_config)?;

    info!("Starting MDP scraper");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    // Process-wide shutdown signal observed by every monitor loop
    let (controller, signal_rx) = shutdown::channel();

    // Stores shared between the coordinator, scrapers, and the API
    let status = StatusStore::new("scrape status", signal_rx.clone());
    let unroutable = UnroutableMessageStore::new("unroutable messages", signal_rx.clone());
    let status_monitor = status.start_monitor();
    let unroutable_monitor = unroutable.start_monitor();

    // Broker connection with publisher confirms
    let (confirm_tx, confirm_rx) = mpsc::unbounded_channel();
    let transport = LapinPublishTransport::connect(&config.message_queue, confirm_tx).await?;
    info!("Broker connection established");

    let coordinator = PublishCoordinator::new(
        "data publish",
        transport,
        confirm_rx,
        status.clone(),
        unroutable.clone(),
        signal_rx.clone(),
    );
    let publish = coordinator.handle();
    let coordinator_monitor = coordinator.start_monitor();

    // Database pool for the price watchlist
    let pool = mdp_common::db::connect(&config.database).await?;
    info!("Database connection pool established");

    // Scrape services
    let client = reqwest::Client::new();
    let tickers = Arc::new(TickerDirectoryScrapeService::new(
        config.tickers.clone(),
        publish.clone(),
        status.clone(),
    ));
    let constituents = Arc::new(IndexConstituentsScrapeService::new(
        config.constituents.clone(),
        client.clone(),
        publish.clone(),
        status.clone(),
    ));
    let prices = Arc::new(DailyPricesScrapeService::new(
        config.prices.clone(),
        client,
        pool,
        publish,
        status.clone(),
        signal_rx.clone(),
    ));

    let app = api::router(AppState {
        status,
        unroutable,
        tickers,
        constituents,
        prices,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown requested, draining monitor loops");
    controller.trigger();

    if let Some(handle) = coordinator_monitor {
        let _ = handle.await;
    }
    if let Some(handle) = status_monitor {
        let _ = handle.await;
    }
    if let Some(handle) = unroutable_monitor {
        let _ = handle.await;
    }

    info!("MDP scraper stopped");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
