//! Scraper service configuration

use serde::{Deserialize, Serialize};

use mdp_common::config::{DatabaseConfig, MessageQueueConfig};
use mdp_common::error::{PipelineError, Result};

use crate::scrape::constituents::IndexConstituentsConfig;
use crate::scrape::ftp::FtpConfig;
use crate::scrape::prices::DailyPricesConfig;
use crate::scrape::tickers::TickerDirectoryConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8010;

// ============================================================================
// Scrape Source Constants
// ============================================================================

/// Default FTP host serving the symbol directory files.
pub const DEFAULT_TICKERS_FTP_HOST: &str = "ftp.nasdaqtrader.com";

/// Default FTP port.
pub const DEFAULT_TICKERS_FTP_PORT: u16 = 21;

/// Default paths of the symbol directory files.
pub const DEFAULT_TICKERS_LISTED_PATH: &str = "/symboldirectory/nasdaqlisted.txt";
pub const DEFAULT_TICKERS_OTHER_LISTED_PATH: &str = "/symboldirectory/otherlisted.txt";

/// Default URL of the index holdings CSV.
pub const DEFAULT_CONSTITUENTS_URL: &str =
    "https://www.ishares.com/us/products/239726/fund/1467271812596.ajax?fileType=csv&dataType=fund";

/// Default base URL of the daily prices endpoint.
pub const DEFAULT_PRICES_BASE_URL: &str = "https://query1.finance.yahoo.com/v7/finance/download";

/// Default pause between per-ticker price requests, in milliseconds.
pub const DEFAULT_PRICES_REQUEST_DELAY_MS: u64 = 3000;

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Scraper service configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub message_queue: MessageQueueConfig,
    pub database: DatabaseConfig,
    pub tickers: TickerDirectoryConfig,
    pub constituents: IndexConstituentsConfig,
    pub prices: DailyPricesConfig,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("SCRAPER_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: std::env::var("SCRAPER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
            },
            message_queue: MessageQueueConfig::from_env(),
            database: DatabaseConfig::from_env(),
            tickers: TickerDirectoryConfig {
                ftp: FtpConfig {
                    host: std::env::var("TICKERS_FTP_HOST")
                        .unwrap_or_else(|_| DEFAULT_TICKERS_FTP_HOST.to_string()),
                    port: std::env::var("TICKERS_FTP_PORT")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(DEFAULT_TICKERS_FTP_PORT),
                    username: std::env::var("TICKERS_FTP_USERNAME")
                        .unwrap_or_else(|_| "anonymous".to_string()),
                    password: std::env::var("TICKERS_FTP_PASSWORD").unwrap_or_default(),
                },
                listed_path: std::env::var("TICKERS_LISTED_PATH")
                    .unwrap_or_else(|_| DEFAULT_TICKERS_LISTED_PATH.to_string()),
                other_listed_path: std::env::var("TICKERS_OTHER_LISTED_PATH")
                    .unwrap_or_else(|_| DEFAULT_TICKERS_OTHER_LISTED_PATH.to_string()),
            },
            constituents: IndexConstituentsConfig {
                url: std::env::var("CONSTITUENTS_URL")
                    .unwrap_or_else(|_| DEFAULT_CONSTITUENTS_URL.to_string()),
            },
            prices: DailyPricesConfig {
                base_url: std::env::var("PRICES_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_PRICES_BASE_URL.to_string()),
                request_delay_ms: std::env::var("PRICES_REQUEST_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_PRICES_REQUEST_DELAY_MS),
            },
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
        if self.tickers.ftp.host.is_empty() {
            return Err(PipelineError::Config(
                "tickers FTP host cannot be empty".to_string(),
            ));
        }
        if self.constituents.url.is_empty() {
            return Err(PipelineError::Config(
                "constituents URL cannot be empty".to_string(),
            ));
        }
        if self.prices.base_url.is_empty() {
            return Err(PipelineError::Config(
                "prices base URL cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
