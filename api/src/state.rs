use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use common::config::Settings;
use common::db::{ExecutionRepository, ProcRepository, ScheduleRepository};
use common::engine::ExecutionEngine;
use common::notification::NotificationDispatcher;
use common::security::SecurityService;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ExecutionEngine>,
    pub procs: Arc<dyn ProcRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub security: Arc<SecurityService>,
    pub notifier: Arc<NotificationDispatcher>,
    pub metrics: Option<PrometheusHandle>,
    pub config: Arc<Settings>,
}

impl AppState {
    /// Create a new AppState instance
    pub fn new(
        engine: Arc<ExecutionEngine>,
        procs: Arc<dyn ProcRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        executions: Arc<dyn ExecutionRepository>,
        security: Arc<SecurityService>,
        notifier: Arc<NotificationDispatcher>,
        config: Settings,
    ) -> Self {
        Self {
            engine,
            procs,
            schedules,
            executions,
            security,
            notifier,
            metrics: None,
            config: Arc::new(config),
        }
    }

    /// Serve `/metrics` from this recorder handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
