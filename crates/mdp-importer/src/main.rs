//! MDP Importer - Main entry point

use anyhow::Result;
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;

use mdp_common::logging::{init_logging, LogConfig};
use mdp_common::shutdown;
use mdp_common::store::{StatusStore, UnprocessableMessageStore};

use mdp_importer::api::{self, AppState};
use mdp_importer::config::{load_import_mappings, Config};
use mdp_importer::import::{ImportCoordinator, LapinConsumeTransport};
use mdp_importer::persist::PgImportExecutor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::from_env()?
        .with_file_prefix("mdp-importer")
        .with_filter_directives("mdp_importer=debug,tower_http=debug,lapin=info,sqlx=info");
    init_logging(&log_config)?;

    info!("Starting MDP importer");

    // Load configuration and the static import mapping table
    let config = Config::load()?;
    let mappings = load_import_mappings(&config.import_mappings_path)?;
    info!(
        "Configuration loaded - {} import mappings, server will bind to {}:{}",
        mappings.len(),
        config.server.host,
        config.server.port
    );

    // Process-wide shutdown signal observed by every monitor loop
    let (controller, signal_rx) = shutdown::channel();

    // Stores shared between the coordinator and the API
    let status = StatusStore::new("import status", signal_rx.clone());
    let unprocessable = UnprocessableMessageStore::new("unprocessable messages", signal_rx.clone());
    let status_monitor = status.start_monitor();
    let unprocessable_monitor = unprocessable.start_monitor();

    // Database pool and import executor
    let pool = mdp_common::db::connect(&config.database).await?;
    info!("Database connection pool established");

    // Broker connection: manual acknowledgment, prefetch 1
    let transport = LapinConsumeTransport::connect(&config.message_queue).await?;
    info!("Broker connection established");

    let coordinator = ImportCoordinator::new(
        "data import",
        transport,
        PgImportExecutor::new(pool),
        mappings,
        status.clone(),
        unprocessable.clone(),
        signal_rx.clone(),
    );
    let coordinator_handle = coordinator.start();

    let app = api::router(AppState {
        status,
        unprocessable,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown requested, draining in-flight delivery");
    controller.trigger();

    // Blocks until any in-flight delivery has finished and the broker
    // resources are closed; the host's deadline bounds this wait.
    let _ = coordinator_handle.await;

    if let Some(handle) = status_monitor {
        let _ = handle.await;
    }
    if let Some(handle) = unprocessable_monitor {
        let _ = handle.await;
    }

    info!("MDP importer stopped");
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
