// Cluster API seam used by the execution engine

pub mod client;
pub mod kubeconfig;
pub mod objects;

pub use client::KubeClient;
pub use kubeconfig::ClusterConnection;
pub use objects::{Job, Pod};

use crate::errors::ClusterError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Chunks of container output, in production order
pub type LogByteStream = BoxStream<'static, Result<Vec<u8>, ClusterError>>;

/// Operations the engine needs from the cluster. Implementations hold no
/// per-request state and must be safe to share across tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit a Job; returns the object as accepted by the API server
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError>;

    /// List Jobs matching a label selector
    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>, ClusterError>;

    /// List Pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError>;

    /// Follow the log of a pod's container until it terminates
    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<LogByteStream, ClusterError>;
}
