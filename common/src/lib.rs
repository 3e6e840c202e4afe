// Common library shared by the daemon, the scheduler and the CLI

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod models;
pub mod naming;
pub mod notification;
pub mod schedule;
pub mod scheduler;
pub mod security;
pub mod telemetry;
