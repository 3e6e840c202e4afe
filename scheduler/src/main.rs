// Scheduler binary entry point

use anyhow::{Context, Result};
use common::bootstrap;
use common::config::Settings;
use common::db::{PgProcRepository, PgScheduleRepository};
use common::scheduler::{SchedulerConfig, SchedulerEngine};
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics_listener(settings.observability.metrics_port)?;

    info!(
        namespace = %settings.kubernetes.namespace,
        fetch_interval_minutes = settings.scheduler.fetch_interval_minutes,
        default_timezone = %settings.scheduler.default_timezone,
        "Starting procyard scheduler"
    );

    let db_pool = bootstrap::init_database_pool(&settings).await?;
    let engine = bootstrap::init_engine(&settings, &db_pool)?;
    let notifier = bootstrap::init_notifications(&settings)?;

    let scheduler = Arc::new(
        SchedulerEngine::new(
            SchedulerConfig::from_settings(&settings)?,
            Arc::new(PgScheduleRepository::new(db_pool.clone())),
            Arc::new(PgProcRepository::new(db_pool.clone())),
            engine,
        )
        .with_notifier(notifier),
    );
    info!("Scheduler engine created");

    // Graceful shutdown on SIGINT/SIGTERM
    let scheduler_for_shutdown = Arc::clone(&scheduler);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, waiting for in-flight tick");
        scheduler_for_shutdown.stop().await;
    });

    scheduler.start().await;

    db_pool.close().await;
    telemetry::shutdown_tracer();
    info!("Scheduler stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
