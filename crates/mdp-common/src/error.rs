//! Error types for the MDP pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the MDP pipeline
///
/// Failures in the coordinators are recorded into a status or dead-letter
/// store and never propagate out of a monitor loop; these variants classify
/// them for that recording.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("No import mapping configured for service '{service}' procedure '{procedure}'")]
    UnknownServiceProcedure { service: String, procedure: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database query timed out after {0}s")]
    DatabaseTimeout(u64),

    #[error("Scrape failed: {0}")]
    ScrapeFailed(String),

    #[error("No data scraped")]
    NoDataScraped,

    #[error("Configuration error: {0}")]
    Config(String),
}
