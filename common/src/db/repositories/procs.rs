// Proc repository implementation

use super::queries::proc_queries;
use super::ProcRepository;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{ProcDefinition, ResourceRequirements};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::instrument;

/// Postgres-backed proc catalogue
pub struct PgProcRepository {
    pool: DbPool,
}

impl PgProcRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<ProcDefinition, DatabaseError> {
        let command: Json<Vec<String>> = row.try_get("command")?;
        let env_vars: Json<BTreeMap<String, String>> = row.try_get("env_vars")?;
        let resources: Json<ResourceRequirements> = row.try_get("resources")?;
        let args: Json<BTreeMap<String, String>> = row.try_get("args")?;

        Ok(ProcDefinition {
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            image: row.try_get("image")?,
            command: command.0,
            env_vars: env_vars.0,
            resources: resources.0,
            group: row.try_get("proc_group")?,
            author: row.try_get("author")?,
            contributors: row.try_get("contributors")?,
            args: args.0,
        })
    }
}

#[async_trait]
impl ProcRepository for PgProcRepository {
    #[instrument(skip(self))]
    async fn find_by_name(&self, name: &str) -> Result<Option<ProcDefinition>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM procs WHERE name = $1",
            proc_queries::SELECT_ALL_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<ProcDefinition>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM procs ORDER BY name",
            proc_queries::SELECT_ALL_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(self.pool.pool()).await?;

        let procs = rows
            .iter()
            .map(Self::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(count = procs.len(), "Listed procs");
        Ok(procs)
    }

    #[instrument(skip(self, proc_def), fields(proc_name = %proc_def.name))]
    async fn upsert(&self, proc_def: &ProcDefinition) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO procs (
                name, description, image, command, env_vars,
                resources, proc_group, author, contributors, args
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (name) DO UPDATE
            SET description = EXCLUDED.description,
                image = EXCLUDED.image,
                command = EXCLUDED.command,
                env_vars = EXCLUDED.env_vars,
                resources = EXCLUDED.resources,
                proc_group = EXCLUDED.proc_group,
                author = EXCLUDED.author,
                contributors = EXCLUDED.contributors,
                args = EXCLUDED.args,
                updated_at = NOW()
            "#,
        )
        .bind(&proc_def.name)
        .bind(&proc_def.description)
        .bind(&proc_def.image)
        .bind(Json(&proc_def.command))
        .bind(Json(&proc_def.env_vars))
        .bind(Json(&proc_def.resources))
        .bind(&proc_def.group)
        .bind(&proc_def.author)
        .bind(&proc_def.contributors)
        .bind(Json(&proc_def.args))
        .execute(self.pool.pool())
        .await?;

        tracing::info!("Proc saved");
        Ok(())
    }
}
