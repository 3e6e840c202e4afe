// HTTP client for the procyard daemon

use anyhow::{anyhow, bail, Context, Result};
use common::models::{Execution, ExecutionStatus, NewSchedule, ProcDefinition, ScheduleDefinition};
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::args::ClientArgs;

pub const EMAIL_HEADER: &str = "Email-Id";
pub const TOKEN_HEADER: &str = "Access-Token";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

/// Status of one execution as reported by the daemon
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStatusView {
    pub name: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

pub struct ProcyardClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    token: String,
}

impl ProcyardClient {
    pub fn new(
        base_url: impl Into<String>,
        email: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            email: email.into(),
            token: token.into(),
        })
    }

    /// Credentials come from flags or the PROCYARD_* environment
    pub fn from_args(args: &ClientArgs) -> Result<Self> {
        let email = args
            .email
            .clone()
            .ok_or_else(|| anyhow!("No email given; pass --email or set PROCYARD_EMAIL"))?;
        let token = args
            .token
            .clone()
            .ok_or_else(|| anyhow!("No token given; pass --token or set PROCYARD_TOKEN"))?;

        Self::new(&args.host, email, token)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!(method = %method, path = %path, "Sending request");
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(EMAIL_HEADER, &self.email)
            .header(TOKEN_HEADER, &self.token)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => bail!("{} ({}): {}", err.error, status.as_u16(), err.message),
            Err(_) => bail!("Request failed with {}: {}", status, body),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Daemon unreachable")?;
        let envelope: Envelope<T> = Self::check(response)
            .await?
            .json()
            .await
            .context("Malformed response from daemon")?;
        Ok(envelope.data)
    }

    pub async fn list_procs(&self) -> Result<Vec<ProcDefinition>> {
        self.fetch(self.request(Method::GET, "/procs")).await
    }

    pub async fn describe_proc(&self, name: &str) -> Result<ProcDefinition> {
        self.fetch(self.request(Method::GET, &format!("/procs/{}", name)))
            .await
    }

    pub async fn execute(
        &self,
        proc_name: &str,
        args: BTreeMap<String, String>,
    ) -> Result<Execution> {
        let body = json!({ "proc_name": proc_name, "args": args });
        self.fetch(self.request(Method::POST, "/executions").json(&body))
            .await
    }

    pub async fn status(&self, execution: &str) -> Result<ExecutionStatusView> {
        self.fetch(self.request(Method::GET, &format!("/executions/{}/status", execution)))
            .await
    }

    /// Copy the execution's log output into `out` as it arrives
    pub async fn stream_logs<W>(
        &self,
        execution: &str,
        wait_seconds: Option<u64>,
        out: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut request = self.request(Method::GET, &format!("/executions/{}/logs", execution));
        if let Some(wait) = wait_seconds {
            request = request.query(&[("wait_seconds", wait)]);
        }

        let response = request.send().await.context("Daemon unreachable")?;
        let mut chunks = Self::check(response).await?.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.context("Log stream interrupted")?;
            out.write_all(&chunk).await?;
            out.flush().await?;
        }
        Ok(())
    }

    pub async fn create_schedule(&self, schedule: &NewSchedule) -> Result<ScheduleDefinition> {
        self.fetch(self.request(Method::POST, "/schedules").json(schedule))
            .await
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleDefinition>> {
        self.fetch(self.request(Method::GET, "/schedules")).await
    }

    pub async fn get_schedule(&self, id: Uuid) -> Result<ScheduleDefinition> {
        self.fetch(self.request(Method::GET, &format!("/schedules/{}", id)))
            .await
    }

    pub async fn delete_schedule(&self, id: Uuid) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("/schedules/{}", id))
            .send()
            .await
            .context("Daemon unreachable")?;
        Self::check(response).await?;
        Ok(())
    }
}
