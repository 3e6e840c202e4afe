// Scheduler loop: claims due schedule occurrences and submits them

pub mod engine;

pub use engine::{SchedulerConfig, SchedulerEngine, SchedulerState, TickReport};
