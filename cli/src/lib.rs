// procyard command-line client: argument definitions and the HTTP client
// for the daemon

pub mod args;
pub mod client;

pub use args::{Cli, ClientArgs, Commands, ScheduleArgs, ScheduleCommands, ScheduleCreateArgs};
pub use client::{ExecutionStatusView, ProcyardClient};
