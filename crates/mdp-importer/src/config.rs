//! Importer service configuration
//!
//! Besides the shared broker and database settings, the importer loads its
//! static import mapping table at startup: one entry per service procedure,
//! naming the stored procedure and parameter that persist its datasets. An
//! identity without an entry is a configuration problem surfaced as an
//! error status when a message for it arrives.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use mdp_common::config::{DatabaseConfig, MessageQueueConfig};
use mdp_common::db;
use mdp_common::error::{PipelineError, Result};
use mdp_common::types::ServiceProcedure;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8020;

/// Default path of the import mapping file.
pub const DEFAULT_IMPORT_MAPPINGS_PATH: &str = "import_mappings.json";

/// Per-identity persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportMapping {
    pub service_procedure: ServiceProcedure,
    pub stored_procedure: String,
    pub parameter_name: String,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Importer service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub message_queue: MessageQueueConfig,
    pub database: DatabaseConfig,
    pub import_mappings_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("IMPORTER_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: std::env::var("IMPORTER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
            },
            message_queue: MessageQueueConfig::from_env(),
            database: DatabaseConfig::from_env(),
            import_mappings_path: std::env::var("IMPORT_MAPPINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_IMPORT_MAPPINGS_PATH)),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(PipelineError::Config(
                "server port must be greater than 0".to_string(),
            ));
        }
        self.message_queue.validate()?;
        self.database.validate()?;
        Ok(())
    }
}

/// Load and validate the import mapping table from a JSON file.
pub fn load_import_mappings(path: &Path) -> Result<HashMap<ServiceProcedure, ImportMapping>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!(
            "failed to read import mappings from '{}': {e}",
            path.display()
        ))
    })?;

    let mappings: Vec<ImportMapping> = serde_json::from_str(&content).map_err(|e| {
        PipelineError::Config(format!(
            "failed to parse import mappings from '{}': {e}",
            path.display()
        ))
    })?;

    for mapping in &mappings {
        db::validate_identifier(&mapping.stored_procedure)?;
        db::validate_identifier(&mapping.parameter_name)?;
    }

    Ok(mappings
        .into_iter()
        .map(|mapping| (mapping.service_procedure.clone(), mapping))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"[
        {
            "service_procedure": {"Service": "TickerDirectoryScrapeService", "Procedure": "scrape_listed"},
            "stored_procedure": "market.import_listed_tickers",
            "parameter_name": "tickers"
        },
        {
            "service_procedure": {"Service": "DailyPricesScrapeService", "Procedure": "scrape_daily_prices"},
            "stored_procedure": "market.import_daily_prices",
            "parameter_name": "prices"
        }
    ]"#;

    #[test]
    fn test_load_import_mappings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let mappings = load_import_mappings(file.path()).unwrap();
        assert_eq!(mappings.len(), 2);

        // Lookup is case-insensitive, like every identity-keyed map.
        let key = ServiceProcedure::new("tickerdirectoryscrapeservice", "SCRAPE_LISTED");
        let mapping = mappings.get(&key).unwrap();
        assert_eq!(mapping.stored_procedure, "market.import_listed_tickers");
        assert_eq!(mapping.parameter_name, "tickers");
    }

    #[test]
    fn test_load_import_mappings_rejects_bad_identifier() {
        let bad = r#"[
            {
                "service_procedure": {"Service": "S", "Procedure": "p"},
                "stored_procedure": "import; drop table",
                "parameter_name": "data"
            }
        ]"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bad.as_bytes()).unwrap();

        assert!(matches!(
            load_import_mappings(file.path()),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_load_import_mappings_missing_file() {
        assert!(matches!(
            load_import_mappings(Path::new("/nonexistent/mappings.json")),
            Err(PipelineError::Config(_))
        ));
    }
}
