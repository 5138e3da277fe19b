//! Database access helpers

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::{PipelineError, Result};

/// Open a connection pool from the shared database configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// Run a query and map every row, bounded by an overall timeout.
pub async fn query_rows<T>(pool: &PgPool, sql: &str, timeout_secs: u64) -> Result<Vec<T>>
where
    T: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin,
{
    let rows = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        sqlx::query_as::<_, T>(sql).fetch_all(pool),
    )
    .await
    .map_err(|_| PipelineError::DatabaseTimeout(timeout_secs))??;
    Ok(rows)
}

/// Validate an identifier that will be interpolated into a statement, such
/// as a stored procedure or parameter name from the import configuration.
/// Only alphanumerics, underscores, and schema-qualifying dots are allowed.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let valid = !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "invalid SQL identifier '{identifier}'"
        )))
    }
}
