// Schedule repository implementation

use super::queries::schedule_queries;
use super::ScheduleRepository;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::ScheduleDefinition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;
use tracing::instrument;
use uuid::Uuid;

/// Postgres-backed schedule catalogue
pub struct PgScheduleRepository {
    pool: DbPool,
}

impl PgScheduleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<ScheduleDefinition, DatabaseError> {
        let args: Json<BTreeMap<String, String>> = row.try_get("args")?;
        let notify_emails: Json<Vec<String>> = row.try_get("notify_emails")?;
        let tags: Json<Vec<String>> = row.try_get("tags")?;

        Ok(ScheduleDefinition {
            id: row.try_get("id")?,
            proc_name: row.try_get("proc_name")?,
            args: args.0,
            time: row.try_get("cron_time")?,
            timezone: row.try_get("timezone")?,
            group: row.try_get("schedule_group")?,
            notify_emails: notify_emails.0,
            tags: tags.0,
            user_email: row.try_get("user_email")?,
            enabled: row.try_get("enabled")?,
            last_triggered_at: row.try_get("last_triggered_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ScheduleRepository for PgScheduleRepository {
    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.id))]
    async fn create(&self, schedule: &ScheduleDefinition) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO schedules (
                id, proc_name, args, cron_time, timezone, schedule_group,
                notify_emails, tags, user_email, enabled, last_triggered_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(schedule.id)
        .bind(&schedule.proc_name)
        .bind(Json(&schedule.args))
        .bind(&schedule.time)
        .bind(&schedule.timezone)
        .bind(&schedule.group)
        .bind(Json(&schedule.notify_emails))
        .bind(Json(&schedule.tags))
        .bind(&schedule.user_email)
        .bind(schedule.enabled)
        .bind(schedule.last_triggered_at)
        .bind(schedule.created_at)
        .execute(self.pool.pool())
        .await?;

        tracing::info!(proc_name = %schedule.proc_name, "Schedule created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ScheduleDefinition>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM schedules WHERE id = $1",
            schedule_queries::SELECT_ALL_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<ScheduleDefinition>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM schedules ORDER BY created_at",
            schedule_queries::SELECT_ALL_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(self.pool.pool()).await?;
        rows.iter().map(Self::from_row).collect()
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!("Schedule deleted");
        }
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn find_enabled(&self) -> Result<Vec<ScheduleDefinition>, DatabaseError> {
        let query = format!(
            "SELECT {} FROM schedules WHERE enabled = TRUE ORDER BY created_at",
            schedule_queries::SELECT_ALL_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(self.pool.pool()).await?;

        let schedules = rows
            .iter()
            .map(Self::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(count = schedules.len(), "Found enabled schedules");
        Ok(schedules)
    }

    #[instrument(skip(self))]
    async fn claim_occurrence(
        &self,
        id: Uuid,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        // A row-level compare-and-set: concurrent claimers serialize on the
        // row lock and all but one see the advanced timestamp
        let result = sqlx::query(
            r#"
            UPDATE schedules
            SET last_triggered_at = $3
            WHERE id = $1
              AND enabled = TRUE
              AND last_triggered_at IS NOT DISTINCT FROM $2
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(now)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
