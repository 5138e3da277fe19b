//! Dataset persistence
//!
//! Each dataset is handed to its configured stored procedure as a single
//! JSONB table-valued parameter; the procedure owns unpacking and upserting.

use sqlx::PgPool;
use std::future::Future;

use mdp_common::db;
use mdp_common::error::Result;
use mdp_common::types::DataTable;

/// Persistence primitive for imported datasets.
pub trait ImportExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        stored_procedure: &str,
        parameter_name: &str,
        table: &DataTable,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Executes import stored procedures against PostgreSQL.
pub struct PgImportExecutor {
    pool: PgPool,
}

impl PgImportExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ImportExecutor for PgImportExecutor {
    async fn execute(
        &self,
        stored_procedure: &str,
        parameter_name: &str,
        table: &DataTable,
    ) -> Result<()> {
        // Both identifiers come from the import mapping file, not from the
        // message, and are validated before interpolation.
        db::validate_identifier(stored_procedure)?;
        db::validate_identifier(parameter_name)?;

        let sql = format!("CALL {stored_procedure}({parameter_name} => $1)");
        sqlx::query(&sql)
            .bind(sqlx::types::Json(table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
