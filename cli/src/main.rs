// procyard CLI entry point

use anyhow::Result;
use clap::Parser;
use common::models::{format_args, ScheduleDefinition};
use procyard_cli::args::env_args;
use procyard_cli::{Cli, Commands, ProcyardClient, ScheduleArgs, ScheduleCommands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ProcyardClient::from_args(&cli.client)?;

    run(&client, cli.command).await
}

async fn run(client: &ProcyardClient, command: Commands) -> Result<()> {
    match command {
        Commands::Execute { proc_name, args } => {
            let execution = client.execute(&proc_name, env_args(&args)?).await?;
            println!("{}", execution.name);
        }
        Commands::List => {
            let procs = client.list_procs().await?;
            println!("{:<28} {:<16} DESCRIPTION", "NAME", "GROUP");
            for proc_def in procs {
                println!(
                    "{:<28} {:<16} {}",
                    proc_def.name, proc_def.group, proc_def.description
                );
            }
        }
        Commands::Describe { proc_name } => {
            let proc_def = client.describe_proc(&proc_name).await?;
            println!("Name:        {}", proc_def.name);
            println!("Description: {}", proc_def.description);
            println!("Image:       {}", proc_def.image);
            println!("Command:     {}", proc_def.command.join(" "));
            println!("Group:       {}", proc_def.group);
            println!("Author:      {}", proc_def.author);
            if !proc_def.args.is_empty() {
                println!("Arguments:");
                for (name, help) in &proc_def.args {
                    println!("  {:<20} {}", name, help);
                }
            }
        }
        Commands::Status { execution } => {
            let view = client.status(&execution).await?;
            match view.reason {
                Some(reason) => println!("{} {} ({})", view.name, view.status, reason),
                None => println!("{} {}", view.name, view.status),
            }
        }
        Commands::Logs {
            execution,
            wait_seconds,
        } => {
            let mut stdout = tokio::io::stdout();
            client
                .stream_logs(&execution, wait_seconds, &mut stdout)
                .await?;
        }
        Commands::Schedule(ScheduleArgs { command, create }) => match command {
            Some(ScheduleCommands::List) => {
                for schedule in client.list_schedules().await? {
                    print_schedule_line(&schedule);
                }
            }
            Some(ScheduleCommands::Describe { id }) => {
                let schedule = client.get_schedule(id).await?;
                println!("{}", serde_json::to_string_pretty(&schedule)?);
            }
            Some(ScheduleCommands::Remove { id }) => {
                client.delete_schedule(id).await?;
                println!("Removed schedule {}", id);
            }
            None => {
                let default_group = match (&create.group, &create.proc_name) {
                    (None, Some(proc_name)) => Some(client.describe_proc(proc_name).await?.group),
                    _ => None,
                };
                let request = create.into_new_schedule(default_group)?;
                let schedule = client.create_schedule(&request).await?;
                println!("{}", schedule.id);
            }
        },
    }

    Ok(())
}

fn print_schedule_line(schedule: &ScheduleDefinition) {
    println!(
        "{}  {:<20} {:<16} {:<12} {}",
        schedule.id,
        schedule.proc_name,
        schedule.time,
        schedule.group,
        format_args(&schedule.args)
    );
}
