// Repository layer: storage seams for procs, schedules and executions

pub mod execution;
pub mod procs;
mod queries;
pub mod schedule;

pub use execution::PgExecutionRepository;
pub use procs::PgProcRepository;
pub use schedule::PgScheduleRepository;

use crate::errors::DatabaseError;
use crate::models::{Execution, ExecutionStatus, ProcDefinition, ScheduleDefinition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Proc catalogue
#[async_trait]
pub trait ProcRepository: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<ProcDefinition>, DatabaseError>;

    async fn list(&self) -> Result<Vec<ProcDefinition>, DatabaseError>;

    /// Insert or replace a proc definition by name
    async fn upsert(&self, proc_def: &ProcDefinition) -> Result<(), DatabaseError>;
}

/// Schedule catalogue plus the occurrence claim used by the scheduler loop
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create(&self, schedule: &ScheduleDefinition) -> Result<(), DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ScheduleDefinition>, DatabaseError>;

    async fn list(&self) -> Result<Vec<ScheduleDefinition>, DatabaseError>;

    /// Returns false when no schedule with that id existed
    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError>;

    async fn find_enabled(&self) -> Result<Vec<ScheduleDefinition>, DatabaseError>;

    /// Conditionally advance `last_triggered_at` from `expected` to `now`.
    ///
    /// Returns true only for the single caller whose `expected` still matched
    /// the stored value; every other concurrent caller gets false.
    async fn claim_occurrence(
        &self,
        id: Uuid,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;
}

/// Execution history
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, execution: &Execution) -> Result<(), DatabaseError>;

    async fn update_status(
        &self,
        name: &str,
        status: ExecutionStatus,
        reason: Option<&str>,
    ) -> Result<(), DatabaseError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Execution>, DatabaseError>;

    /// Most recent executions first
    async fn list_recent(&self, limit: i64) -> Result<Vec<Execution>, DatabaseError>;
}
