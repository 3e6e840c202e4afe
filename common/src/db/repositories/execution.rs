// Execution repository implementation

use super::queries::execution_queries;
use super::ExecutionRepository;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Execution, ExecutionStatus};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::instrument;

/// Postgres-backed execution history
pub struct PgExecutionRepository {
    pool: DbPool,
}

impl PgExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<Execution, DatabaseError> {
        let command: Json<Vec<String>> = row.try_get("command")?;
        let env: Json<BTreeMap<String, String>> = row.try_get("env")?;
        let status: String = row.try_get("status")?;
        let status = ExecutionStatus::try_from(status).map_err(DatabaseError::QueryFailed)?;

        Ok(Execution {
            name: row.try_get("name")?,
            proc_name: row.try_get("proc_name")?,
            image_tag: row.try_get("image_tag")?,
            command: command.0,
            env: env.0,
            requester: row.try_get("requester")?,
            status,
            reason: row.try_get("reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    #[instrument(skip(self, execution), fields(execution_name = %execution.name))]
    async fn create(&self, execution: &Execution) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO executions (
                name, proc_name, image_tag, command, env,
                requester, status, reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&execution.name)
        .bind(&execution.proc_name)
        .bind(&execution.image_tag)
        .bind(Json(&execution.command))
        .bind(Json(&execution.env))
        .bind(&execution.requester)
        .bind(execution.status.to_string())
        .bind(&execution.reason)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(proc_name = %execution.proc_name, "Execution recorded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        name: &str,
        status: ExecutionStatus,
        reason: Option<&str>,
    ) -> Result<(), DatabaseError> {
        // Terminal rows are final and RUNNING never steps back to CREATED
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2,
                reason = COALESCE($3, reason),
                updated_at = NOW()
            WHERE name = $1
              AND status NOT IN ('SUCCEEDED', 'FAILED', 'TIMED_OUT')
              AND NOT (status = 'RUNNING' AND $2 = 'CREATED')
            "#,
        )
        .bind(name)
        .bind(status.to_string())
        .bind(reason)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM executions WHERE name = $1")
                .bind(name)
                .fetch_optional(self.pool.pool())
                .await?
                .is_some();
            if !exists {
                return Err(DatabaseError::NotFound(format!(
                    "Execution not found: {}",
                    name
                )));
            }
            tracing::debug!(status = %status, "Ignored status update behind the stored state");
            return Ok(());
        }

        tracing::debug!(status = %status, "Execution status updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_name(&self, name: &str) -> Result<Option<Execution>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM executions WHERE name = $1",
            execution_queries::SELECT_ALL_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_recent(&self, limit: i64) -> Result<Vec<Execution>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM executions ORDER BY created_at DESC LIMIT $1",
            execution_queries::SELECT_ALL_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(self.pool.pool())
            .await?;

        rows.iter().map(Self::from_row).collect()
    }
}
