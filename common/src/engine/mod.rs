// Execution engine: turns proc executions into cluster Jobs, projects their
// status and streams their logs.

pub mod job_builder;
pub mod logs;
pub mod status;

pub use logs::LogStream;
pub use status::{project_status, Observation, StatusTracker};

use crate::cluster::ClusterApi;
use crate::config::{JobConfig, LogStreamConfig, Settings};
use crate::db::ExecutionRepository;
use crate::errors::EngineError;
use crate::models::{Execution, ExecutionRequest, ExecutionState, ExecutionStatus, ProcDefinition};
use crate::naming;
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

/// Submission seam used by the scheduler loop and the daemon
#[async_trait]
pub trait ExecutionSubmitter: Send + Sync {
    async fn submit(
        &self,
        proc_def: &ProcDefinition,
        request: &ExecutionRequest,
    ) -> Result<Execution, EngineError>;
}

pub struct ExecutionEngine {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    job_config: JobConfig,
    log_config: LogStreamConfig,
    tracker: StatusTracker,
    executions: Option<Arc<dyn ExecutionRepository>>,
}

impl ExecutionEngine {
    pub fn new(cluster: Arc<dyn ClusterApi>, settings: &Settings) -> Self {
        Self {
            cluster,
            namespace: settings.kubernetes.namespace.clone(),
            job_config: settings.job.clone(),
            log_config: settings.logs.clone(),
            tracker: StatusTracker::new(),
            executions: None,
        }
    }

    /// Record executions and their status transitions in a store
    pub fn with_execution_repository(mut self, repository: Arc<dyn ExecutionRepository>) -> Self {
        self.executions = Some(repository);
        self
    }

    /// How long log callers wait for a pod when they do not say otherwise
    pub fn default_log_wait(&self) -> Duration {
        Duration::from_secs(self.job_config.pod_list_wait_seconds)
    }

    /// Build and submit the Job for one run of `proc_def`
    #[instrument(skip(self, proc_def, request), fields(proc_name = %proc_def.name))]
    pub async fn submit(
        &self,
        proc_def: &ProcDefinition,
        request: &ExecutionRequest,
    ) -> Result<Execution, EngineError> {
        let name = naming::derive_execution_name(&proc_def.name);
        let job = job_builder::build_job(
            &name,
            &self.namespace,
            proc_def,
            request,
            &self.job_config,
        );

        if let Err(source) = self.cluster.create_job(&self.namespace, &job).await {
            warn!(execution_name = %name, error = %source, "Cluster rejected job");
            telemetry::record_execution_failure(&proc_def.name, "cluster_rejected");
            return Err(EngineError::ClusterSubmission {
                job_name: name,
                source,
            });
        }

        // With a store wired in, the record is the baseline for later lookups
        if self.executions.is_none() {
            self.tracker.seed(&name).await;
        }
        telemetry::record_execution_submitted(&proc_def.name);

        let now = Utc::now();
        let execution = Execution {
            name: name.clone(),
            proc_name: proc_def.name.clone(),
            image_tag: proc_def.image.clone(),
            command: job_builder::effective_command(proc_def, request),
            env: job_builder::merge_env(&proc_def.env_vars, &request.env),
            requester: request.requester.clone(),
            status: ExecutionStatus::Created,
            reason: None,
            created_at: now,
            updated_at: now,
        };

        if let Some(repository) = &self.executions {
            if let Err(e) = repository.create(&execution).await {
                warn!(execution_name = %name, error = %e, "Failed to record execution");
            }
        }

        info!(execution_name = %name, image = %proc_def.image, "Execution submitted");
        Ok(execution)
    }

    /// Run `proc_def` with env overrides and an optional command override,
    /// returning the execution name
    pub async fn execute(
        &self,
        proc_def: &ProcDefinition,
        env_overrides: BTreeMap<String, String>,
        command: Vec<String>,
    ) -> Result<String, EngineError> {
        let request = ExecutionRequest::new(&proc_def.name)
            .with_env(env_overrides)
            .with_command(command);
        Ok(self.submit(proc_def, &request).await?.name)
    }

    pub async fn get_status(&self, name: &str) -> Result<ExecutionStatus, EngineError> {
        Ok(self.describe(name).await?.status)
    }

    /// Current status of an execution plus its terminal reason, if any
    #[instrument(skip(self))]
    pub async fn describe(&self, name: &str) -> Result<ExecutionState, EngineError> {
        let selector = naming::label_selector_for(name);
        let jobs = self.cluster.list_jobs(&self.namespace, &selector).await?;

        let restored = match self.tracker.current(name).await {
            Some(_) => None,
            None => self.restore_from_store(name).await,
        };

        let observed = match jobs.first() {
            // The Job carries the limit it was submitted with
            Some(job) => project_status(
                job,
                job.spec
                    .backoff_limit
                    .unwrap_or(self.job_config.backoff_limit),
            ),
            None => {
                debug!("No job found for execution yet");
                ExecutionState {
                    status: ExecutionStatus::Created,
                    reason: None,
                }
            }
        };

        let observation = self.tracker.observe(name, observed).await;
        let mut stored = !observation.changed && restored.as_ref() == Some(&observation.state);
        if observation.changed {
            telemetry::record_status_transition(observation.state.status);
            if let Some(repository) = &self.executions {
                let state = &observation.state;
                match repository
                    .update_status(name, state.status, state.reason.as_deref())
                    .await
                {
                    Ok(()) => stored = true,
                    Err(e) => warn!(error = %e, "Failed to persist status transition"),
                }
            }
        }

        // Terminal states are final; once stored, the store answers for them
        if stored && observation.state.status.is_terminal() {
            self.tracker.forget(name).await;
        }

        Ok(observation.state)
    }

    /// Number of executions whose state is held in memory
    pub async fn tracked_executions(&self) -> usize {
        self.tracker.len().await
    }

    async fn restore_from_store(&self, name: &str) -> Option<ExecutionState> {
        let repository = self.executions.as_ref()?;
        match repository.find_by_name(name).await {
            Ok(Some(record)) => {
                let state = ExecutionState {
                    status: record.status,
                    reason: record.reason,
                };
                if !self.tracker.restore(name, state.clone()).await {
                    return None;
                }
                debug!(status = %state.status, "Restored execution state from store");
                Some(state)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load execution state");
                None
            }
        }
    }

    /// Wait for a log-ready pod and attach to its output
    #[instrument(skip(self), fields(wait_ms = wait.as_millis() as u64))]
    pub async fn stream_logs(&self, name: &str, wait: Duration) -> Result<LogStream, EngineError> {
        let selector = naming::label_selector_for(name);
        let poll_interval = Duration::from_millis(self.job_config.pod_poll_interval_ms);
        let deadline = Instant::now() + wait;

        let pod = loop {
            let pods = self.cluster.list_pods(&self.namespace, &selector).await?;
            if let Some(pod) = pods.into_iter().find(|p| p.is_log_ready()) {
                break pod;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("No log-ready pod before timeout");
                return Err(EngineError::PodNotReadyTimeout {
                    job_name: name.to_string(),
                    waited: wait,
                });
            }
            sleep(poll_interval.min(deadline - now)).await;
        };

        debug!(pod = %pod.name(), phase = %pod.phase(), "Pod ready for log streaming");
        let source = self
            .cluster
            .stream_pod_logs(&self.namespace, pod.name(), name)
            .await
            .map_err(|e| EngineError::LogStream {
                job_name: name.to_string(),
                message: e.to_string(),
            })?;

        Ok(LogStream::spawn(name, source, &self.log_config))
    }
}

#[async_trait]
impl ExecutionSubmitter for ExecutionEngine {
    async fn submit(
        &self,
        proc_def: &ProcDefinition,
        request: &ExecutionRequest,
    ) -> Result<Execution, EngineError> {
        ExecutionEngine::submit(self, proc_def, request).await
    }
}
