// Command-line arguments

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use common::models::{parse_args, NewSchedule};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "procyard")]
#[command(version)]
#[command(about = "Run and schedule procs on a Kubernetes cluster")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub client: ClientArgs,

    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Daemon address
    #[arg(long, env = "PROCYARD_HOST", default_value = "http://localhost:5001", global = true)]
    pub host: String,

    /// Email the token was issued to
    #[arg(long, env = "PROCYARD_EMAIL", global = true)]
    pub email: Option<String>,

    /// Access token
    #[arg(long, env = "PROCYARD_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a proc once, overriding env vars with KEY=VALUE pairs
    Execute {
        proc_name: String,

        /// KEY=VALUE env var overrides
        args: Vec<String>,
    },

    /// List available procs
    List,

    /// Show a proc and the arguments it accepts
    Describe { proc_name: String },

    /// Show the status of an execution
    Status { execution: String },

    /// Follow the output of an execution
    Logs {
        execution: String,

        /// Seconds to wait for the pod to start
        #[arg(long)]
        wait_seconds: Option<u64>,
    },

    /// Create a schedule, or manage existing ones
    Schedule(ScheduleArgs),
}

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub command: Option<ScheduleCommands>,

    #[command(flatten)]
    pub create: ScheduleCreateArgs,
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommands {
    /// List schedules
    List,

    /// Show one schedule
    Describe { id: Uuid },

    /// Delete a schedule
    Remove { id: Uuid },
}

#[derive(Args, Debug, Default)]
pub struct ScheduleCreateArgs {
    pub proc_name: Option<String>,

    /// KEY=VALUE env var overrides
    pub args: Vec<String>,

    /// Cron expression, e.g. "30 2 * * *"
    #[arg(long)]
    pub time: Option<String>,

    /// IANA timezone the expression is evaluated in
    #[arg(long)]
    pub timezone: Option<String>,

    /// Group allowed to manage the schedule (defaults to the proc's group)
    #[arg(long)]
    pub group: Option<String>,

    /// Comma-separated emails to notify on each run
    #[arg(long, value_delimiter = ',')]
    pub notify: Vec<String>,

    /// Comma-separated tags
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,
}

impl ScheduleCreateArgs {
    /// Build the schedule request; `default_group` fills in a missing `--group`
    pub fn into_new_schedule(self, default_group: Option<String>) -> Result<NewSchedule> {
        let proc_name = self
            .proc_name
            .ok_or_else(|| anyhow!("A proc name is required to create a schedule"))?;
        let time = self
            .time
            .ok_or_else(|| anyhow!("--time is required to create a schedule"))?;
        let group = self
            .group
            .or(default_group)
            .ok_or_else(|| anyhow!("--group is required to create a schedule"))?;

        Ok(NewSchedule {
            proc_name,
            args: env_args(&self.args)?,
            time,
            timezone: self.timezone,
            group,
            notify_emails: self.notify,
            tags: self.tags,
        })
    }
}

/// Parse `KEY=VALUE` positional arguments
pub fn env_args(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    parse_args(pairs).map_err(|e| anyhow!(e))
}
