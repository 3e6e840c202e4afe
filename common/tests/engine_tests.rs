// Execution engine tests against an in-memory cluster

use async_trait::async_trait;
use common::cluster::objects::{JobCondition, JobStatus, ObjectMeta, PodStatus};
use common::cluster::{ClusterApi, Job, LogByteStream, Pod};
use common::config::Settings;
use common::engine::ExecutionEngine;
use common::errors::{ClusterError, DatabaseError, EngineError};
use common::models::{Execution, ExecutionStatus, ProcDefinition, ResourceRequirements};
use common::naming;
use common::db::ExecutionRepository;
use futures::stream;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Cluster that keeps submitted Jobs in memory and lets tests drive their
/// status and pods
#[derive(Default)]
struct FakeCluster {
    jobs: Mutex<Vec<Job>>,
    pods: Mutex<Vec<Pod>>,
    logs: Mutex<Vec<Vec<u8>>>,
    reject_with: Mutex<Option<u16>>,
}

impl FakeCluster {
    fn set_job_status(&self, name: &str, status: JobStatus) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.name() == name) {
            job.status = Some(status);
        }
    }

    fn add_pod(&self, execution_name: &str, phase: &str) {
        self.pods.lock().unwrap().push(Pod {
            metadata: ObjectMeta {
                name: Some(format!("{}-pod", execution_name)),
                labels: naming::label_set_for(execution_name),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
            }),
        });
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create_job(&self, _namespace: &str, job: &Job) -> Result<Job, ClusterError> {
        if let Some(status) = *self.reject_with.lock().unwrap() {
            return Err(ClusterError::Api {
                status,
                message: "admission webhook denied the request".to_string(),
            });
        }
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job.clone())
    }

    async fn list_jobs(&self, _namespace: &str, selector: &str) -> Result<Vec<Job>, ClusterError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| naming::matches_selector(&j.metadata.labels, selector))
            .cloned()
            .collect())
    }

    async fn list_pods(&self, _namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| naming::matches_selector(&p.metadata.labels, selector))
            .cloned()
            .collect())
    }

    async fn stream_pod_logs(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
    ) -> Result<LogByteStream, ClusterError> {
        let chunks: Vec<Result<Vec<u8>, ClusterError>> =
            self.logs.lock().unwrap().iter().cloned().map(Ok).collect();
        Ok(stream::iter(chunks).boxed())
    }
}

#[derive(Default)]
struct RecordingExecutions {
    records: Mutex<HashMap<String, Execution>>,
    updates: Mutex<Vec<(String, ExecutionStatus)>>,
}

#[async_trait]
impl ExecutionRepository for RecordingExecutions {
    async fn create(&self, execution: &Execution) -> Result<(), DatabaseError> {
        self.records
            .lock()
            .unwrap()
            .insert(execution.name.clone(), execution.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        name: &str,
        status: ExecutionStatus,
        reason: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.updates
            .lock()
            .unwrap()
            .push((name.to_string(), status));
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(name)
            .ok_or_else(|| DatabaseError::NotFound(name.to_string()))?;
        record.status = status;
        if let Some(reason) = reason {
            record.reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Execution>, DatabaseError> {
        Ok(self.records.lock().unwrap().get(name).cloned())
    }

    async fn list_recent(&self, _limit: i64) -> Result<Vec<Execution>, DatabaseError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}

fn busybox() -> ProcDefinition {
    ProcDefinition {
        name: "busybox".to_string(),
        description: "prints its environment".to_string(),
        image: "busybox:1.36".to_string(),
        command: vec!["env".to_string()],
        env_vars: BTreeMap::from([("SAMPLE_ARG".to_string(), "default".to_string())]),
        resources: ResourceRequirements::default(),
        group: "ops".to_string(),
        author: "ops".to_string(),
        contributors: String::new(),
        args: BTreeMap::new(),
    }
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.kubernetes.namespace = "procs".to_string();
    settings.job.backoff_limit = 1;
    settings.job.pod_poll_interval_ms = 10;
    settings.logs.write_buffer_size = 16;
    settings.logs.read_buffer_size = 8;
    settings
}

#[tokio::test]
async fn test_execute_then_status_follows_job_lifecycle() {
    let cluster = Arc::new(FakeCluster::default());
    let executions = Arc::new(RecordingExecutions::default());
    let engine = ExecutionEngine::new(cluster.clone(), &settings())
        .with_execution_repository(executions.clone());

    let name = engine
        .execute(
            &busybox(),
            BTreeMap::from([("SAMPLE_ARG".to_string(), "override".to_string())]),
            vec![],
        )
        .await
        .unwrap();
    assert!(name.starts_with("busybox-"));
    assert_eq!(engine.get_status(&name).await.unwrap(), ExecutionStatus::Running);

    let submitted = cluster.jobs.lock().unwrap()[0].clone();
    let container = &submitted.spec.template.spec.containers[0];
    assert_eq!(container.name, name);
    assert_eq!(container.env[0].value, "override");
    assert_eq!(submitted.spec.backoff_limit, Some(1));

    cluster.set_job_status(
        &name,
        JobStatus {
            succeeded: Some(1),
            ..Default::default()
        },
    );
    assert_eq!(engine.get_status(&name).await.unwrap(), ExecutionStatus::Succeeded);

    // A stale read from the cluster must not move the lifecycle backwards
    cluster.set_job_status(
        &name,
        JobStatus {
            active: Some(1),
            ..Default::default()
        },
    );
    assert_eq!(engine.get_status(&name).await.unwrap(), ExecutionStatus::Succeeded);

    let record = executions.find_by_name(&name).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Succeeded);
    assert_eq!(record.env.get("SAMPLE_ARG").map(String::as_str), Some("override"));
}

#[tokio::test]
async fn test_unknown_execution_is_created() {
    let engine = ExecutionEngine::new(Arc::new(FakeCluster::default()), &settings());
    assert_eq!(
        engine.get_status("busybox-0123456789abcdef").await.unwrap(),
        ExecutionStatus::Created
    );
}

#[tokio::test]
async fn test_deadline_exceeded_reports_timed_out_with_reason() {
    let cluster = Arc::new(FakeCluster::default());
    let engine = ExecutionEngine::new(cluster.clone(), &settings());
    let name = engine.execute(&busybox(), BTreeMap::new(), vec![]).await.unwrap();

    cluster.set_job_status(
        &name,
        JobStatus {
            failed: Some(1),
            conditions: vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                reason: Some("DeadlineExceeded".to_string()),
                message: Some("Job was active longer than specified deadline".to_string()),
            }],
            ..Default::default()
        },
    );

    let state = engine.describe(&name).await.unwrap();
    assert_eq!(state.status, ExecutionStatus::TimedOut);
    assert_eq!(
        state.reason.as_deref(),
        Some("Job was active longer than specified deadline")
    );
}

#[tokio::test]
async fn test_cluster_rejection_is_submission_error() {
    let cluster = Arc::new(FakeCluster::default());
    *cluster.reject_with.lock().unwrap() = Some(403);
    let engine = ExecutionEngine::new(cluster.clone(), &settings());

    let err = engine
        .execute(&busybox(), BTreeMap::new(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ClusterSubmission {
            source: ClusterError::Api { status: 403, .. },
            ..
        }
    ));
    assert!(cluster.jobs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_logs_delivers_bytes_in_order() {
    let cluster = Arc::new(FakeCluster::default());
    let engine = ExecutionEngine::new(cluster.clone(), &settings());
    let name = engine.execute(&busybox(), BTreeMap::new(), vec![]).await.unwrap();

    cluster.add_pod(&name, "Running");
    let expected: String = (0..50).map(|i| format!("line {}\n", i)).collect();
    *cluster.logs.lock().unwrap() = expected
        .as_bytes()
        .chunks(7)
        .map(|c| c.to_vec())
        .collect();

    let mut stream = engine
        .stream_logs(&name, Duration::from_millis(200))
        .await
        .unwrap();
    let mut output = String::new();
    stream.read_to_string(&mut output).await.unwrap();

    assert_eq!(output, expected);
}

#[tokio::test]
async fn test_stream_logs_times_out_without_ready_pod() {
    let cluster = Arc::new(FakeCluster::default());
    let engine = ExecutionEngine::new(cluster.clone(), &settings());
    let name = engine.execute(&busybox(), BTreeMap::new(), vec![]).await.unwrap();
    cluster.add_pod(&name, "Pending");

    let started = std::time::Instant::now();
    let err = engine
        .stream_logs(&name, Duration::from_millis(50))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, EngineError::PodNotReadyTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_terminal_status_survives_restart_after_job_is_gone() {
    let cluster = Arc::new(FakeCluster::default());
    let executions = Arc::new(RecordingExecutions::default());
    let engine = ExecutionEngine::new(cluster.clone(), &settings())
        .with_execution_repository(executions.clone());

    let name = engine.execute(&busybox(), BTreeMap::new(), vec![]).await.unwrap();
    cluster.set_job_status(
        &name,
        JobStatus {
            succeeded: Some(1),
            ..Default::default()
        },
    );
    assert_eq!(engine.get_status(&name).await.unwrap(), ExecutionStatus::Succeeded);
    drop(engine);

    // Daemon restarts after the TTL controller removed the Job
    cluster.jobs.lock().unwrap().clear();
    executions.updates.lock().unwrap().clear();
    let restarted = ExecutionEngine::new(cluster.clone(), &settings())
        .with_execution_repository(executions.clone());

    assert_eq!(
        restarted.get_status(&name).await.unwrap(),
        ExecutionStatus::Succeeded
    );
    assert!(executions.updates.lock().unwrap().is_empty());
    let record = executions.find_by_name(&name).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn test_running_status_survives_restart_before_job_is_listed() {
    let cluster = Arc::new(FakeCluster::default());
    let executions = Arc::new(RecordingExecutions::default());
    let engine = ExecutionEngine::new(cluster.clone(), &settings())
        .with_execution_repository(executions.clone());

    let name = engine.execute(&busybox(), BTreeMap::new(), vec![]).await.unwrap();
    assert_eq!(engine.get_status(&name).await.unwrap(), ExecutionStatus::Running);
    drop(engine);

    cluster.jobs.lock().unwrap().clear();
    let restarted = ExecutionEngine::new(cluster.clone(), &settings())
        .with_execution_repository(executions.clone());

    assert_eq!(restarted.get_status(&name).await.unwrap(), ExecutionStatus::Running);
    let record = executions.find_by_name(&name).await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Running);
}

#[tokio::test]
async fn test_terminal_executions_are_released_from_memory() {
    let cluster = Arc::new(FakeCluster::default());
    let executions = Arc::new(RecordingExecutions::default());
    let engine = ExecutionEngine::new(cluster.clone(), &settings())
        .with_execution_repository(executions.clone());

    let mut names = Vec::new();
    for _ in 0..3 {
        names.push(engine.execute(&busybox(), BTreeMap::new(), vec![]).await.unwrap());
    }
    for name in &names {
        assert_eq!(engine.get_status(name).await.unwrap(), ExecutionStatus::Running);
    }
    assert_eq!(engine.tracked_executions().await, 3);

    for name in &names {
        cluster.set_job_status(
            name,
            JobStatus {
                failed: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(engine.get_status(name).await.unwrap(), ExecutionStatus::Failed);
    }
    assert_eq!(engine.tracked_executions().await, 0);

    // Answered from the store once released, even with the Job gone
    cluster.jobs.lock().unwrap().clear();
    let state = engine.describe(&names[0]).await.unwrap();
    assert_eq!(state.status, ExecutionStatus::Failed);
    assert!(state.reason.unwrap().contains("backoff limit 1"));
    assert_eq!(engine.tracked_executions().await, 0);
}
