// Kubernetes REST client built on reqwest

use super::kubeconfig::ClusterConnection;
use super::objects::{ApiStatus, Job, ObjectList, Pod};
use super::{ClusterApi, LogByteStream};
use crate::errors::ClusterError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Certificate, Client, Identity, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Stateless API client; cloning shares the underlying connection pool
#[derive(Clone, Debug)]
pub struct KubeClient {
    client: Client,
    server: String,
    token: Option<String>,
}

impl KubeClient {
    /// Build a client from resolved connection details
    pub fn new(connection: &ClusterConnection) -> Result<Self, ClusterError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(connection.insecure_skip_tls_verify);

        if let Some(ca) = &connection.ca_pem {
            let certificate = Certificate::from_pem(ca)
                .map_err(|e| ClusterError::Config(format!("invalid cluster CA: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }

        if let Some(pem) = &connection.identity_pem {
            let identity = Identity::from_pem(pem)
                .map_err(|e| ClusterError::Config(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| ClusterError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            server: connection.server.trim_end_matches('/').to_string(),
            token: connection.token.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn jobs_url(&self, namespace: &str) -> String {
        format!("{}/apis/batch/v1/namespaces/{}/jobs", self.server, namespace)
    }

    fn pods_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.server, namespace)
    }

    /// Turn non-2xx responses into `ClusterError::Api` carrying the server's message
    async fn check(response: Response) -> Result<Response, ClusterError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiStatus>(&body)
            .ok()
            .filter(|s| !s.message.is_empty())
            .map(|s| {
                if s.reason.is_empty() {
                    s.message
                } else {
                    format!("{}: {}", s.reason, s.message)
                }
            })
            .unwrap_or(body);

        warn!(status = status.as_u16(), message = %message, "Cluster API request failed");
        Err(ClusterError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    #[instrument(skip(self, job), fields(job_name = %job.name()))]
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError> {
        let response = self
            .authorized(self.client.post(self.jobs_url(namespace)))
            .json(job)
            .send()
            .await?;
        let created = Self::check(response).await?.json::<Job>().await?;

        debug!("Job accepted by API server");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>, ClusterError> {
        let response = self
            .authorized(self.client.get(self.jobs_url(namespace)))
            .query(&[("labelSelector", selector)])
            .send()
            .await?;
        let list = Self::check(response).await?.json::<ObjectList<Job>>().await?;
        Ok(list.items)
    }

    #[instrument(skip(self))]
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let response = self
            .authorized(self.client.get(self.pods_url(namespace)))
            .query(&[("labelSelector", selector)])
            .send()
            .await?;
        let list = Self::check(response).await?.json::<ObjectList<Pod>>().await?;
        Ok(list.items)
    }

    #[instrument(skip(self))]
    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<LogByteStream, ClusterError> {
        let url = format!("{}/{}/log", self.pods_url(namespace), pod);
        let response = self
            .authorized(self.client.get(url))
            .query(&[("follow", "true"), ("container", container)])
            .send()
            .await?;
        let response = Self::check(response).await?;

        debug!("Attached to pod log stream");
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ClusterError::from));
        Ok(stream.boxed())
    }
}
