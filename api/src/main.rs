// HTTP daemon entry point

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;

mod handlers;
mod middleware;
mod routes;
mod state;

use common::bootstrap;
use common::config::Settings;
use common::db::{PgExecutionRepository, PgProcRepository, PgScheduleRepository};
use common::telemetry;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(
        &config.observability.log_level,
        config.observability.tracing_endpoint.as_deref(),
    )?;
    let metrics_handle = telemetry::init_metrics()?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        namespace = %config.kubernetes.namespace,
        "Starting procyard API server"
    );

    let db_pool = bootstrap::init_database_pool(&config).await?;
    let engine = bootstrap::init_engine(&config, &db_pool)?;
    let security = bootstrap::init_security(&config);
    let notifier = bootstrap::init_notifications(&config)?;

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .context("Invalid server host")?,
        config.server.port,
    ));

    let state = AppState::new(
        engine,
        Arc::new(PgProcRepository::new(db_pool.clone())),
        Arc::new(PgScheduleRepository::new(db_pool.clone())),
        Arc::new(PgExecutionRepository::new(db_pool.clone())),
        security,
        notifier,
        config,
    )
    .with_metrics(metrics_handle);

    let app = routes::create_router(state);

    tracing::info!(addr = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db_pool.close().await;
    telemetry::shutdown_tracer();
    tracing::info!("API server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutting down gracefully");
}
