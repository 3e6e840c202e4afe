// Database layer: Postgres pool and repositories

pub mod pool;
pub mod repositories;

pub use pool::DbPool;
pub use repositories::{
    ExecutionRepository, PgExecutionRepository, PgProcRepository, PgScheduleRepository,
    ProcRepository, ScheduleRepository,
};
