// Bootstrap utilities shared by the daemon and scheduler binaries

use crate::cluster::{ClusterApi, ClusterConnection, KubeClient};
use crate::config::Settings;
use crate::db::{DbPool, PgExecutionRepository};
use crate::engine::ExecutionEngine;
use crate::notification::NotificationDispatcher;
use crate::security::SecurityService;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to Postgres and apply pending migrations
///
/// # Errors
/// Returns error if the pool cannot connect or a migration fails
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;
    db_pool
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Resolve cluster credentials and build the REST client
///
/// # Errors
/// Returns error if the kubeconfig or service account cannot be read
#[tracing::instrument(skip(settings))]
pub fn init_cluster_client(settings: &Settings) -> Result<Arc<dyn ClusterApi>> {
    info!(
        config_path = %settings.kubernetes.config_path,
        context = %settings.kubernetes.context,
        "Initializing cluster client"
    );

    let connection = ClusterConnection::resolve(&settings.kubernetes)
        .context("Failed to resolve cluster connection")?;
    let client = KubeClient::new(&connection).context("Failed to create cluster client")?;

    info!(server = %connection.server, "Cluster client initialized");
    Ok(Arc::new(client))
}

/// Execution engine recording executions in Postgres
///
/// # Errors
/// Returns error if the cluster client cannot be created
#[tracing::instrument(skip(settings, db_pool))]
pub fn init_engine(settings: &Settings, db_pool: &DbPool) -> Result<Arc<ExecutionEngine>> {
    let cluster = init_cluster_client(settings)?;
    let engine = ExecutionEngine::new(cluster, settings)
        .with_execution_repository(Arc::new(PgExecutionRepository::new(db_pool.clone())));

    info!(namespace = %settings.kubernetes.namespace, "Execution engine initialized");
    Ok(Arc::new(engine))
}

/// Security service for the configured auth plugin; the plugin itself is
/// loaded on first use
pub fn init_security(settings: &Settings) -> Arc<SecurityService> {
    info!(
        plugin_binary = %settings.auth.plugin_binary,
        plugin_exported = %settings.auth.plugin_exported,
        "Security service configured"
    );
    Arc::new(SecurityService::from_config(&settings.auth))
}

/// Notification dispatcher with every configured observer
///
/// # Errors
/// Returns error if an observer's HTTP client cannot be built
pub fn init_notifications(settings: &Settings) -> Result<Arc<NotificationDispatcher>> {
    let dispatcher =
        NotificationDispatcher::from_config(&settings.notification, NOTIFICATION_TIMEOUT)
            .context("Failed to initialize notification observers")?;

    info!(
        observers = dispatcher.observer_count(),
        "Notification dispatcher initialized"
    );
    Ok(Arc::new(dispatcher))
}
