use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::handlers::procs::find_proc;
use crate::handlers::{authorize, ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::{Execution, ExecutionRequest, ExecutionStatus, UserIdentity};
use common::notification::ExecutionEvent;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

/// Body of `POST /executions`
#[derive(Debug, Deserialize)]
pub struct CreateExecutionRequest {
    pub proc_name: String,
    /// Env var overrides, `KEY -> VALUE`
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    /// Replaces the proc's default command when non-empty
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// How long to wait for a pod to come up before giving up
    pub wait_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionStatusView {
    pub name: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Run a proc once on behalf of the caller
#[tracing::instrument(skip(state, user, body), fields(email = %user.email, proc_name = %body.proc_name))]
pub async fn create_execution(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Json(body): Json<CreateExecutionRequest>,
) -> Result<(StatusCode, Json<SuccessResponse<Execution>>), ErrorResponse> {
    let proc_def = find_proc(&state, &body.proc_name).await?;
    authorize(&state, &user, &proc_def.group).await?;

    let request = ExecutionRequest::new(&proc_def.name)
        .with_env(body.args)
        .with_command(body.command)
        .with_requester(&user.email)
        .with_annotations(body.annotations);
    let execution = state.engine.submit(&proc_def, &request).await?;

    let notifier = Arc::clone(&state.notifier);
    let event = ExecutionEvent::from_execution(&user.email, &execution);
    tokio::spawn(async move {
        notifier.notify(&event).await;
    });

    Ok((StatusCode::CREATED, Json(SuccessResponse::new(execution))))
}

/// Most recent executions first
#[tracing::instrument(skip(state))]
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<SuccessResponse<Vec<Execution>>>, ErrorResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let executions = state.executions.list_recent(limit).await?;

    tracing::info!(count = executions.len(), "Listed executions");
    Ok(Json(SuccessResponse::new(executions)))
}

/// Get the stored record of one execution
#[tracing::instrument(skip(state))]
pub async fn get_execution(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse<Execution>>, ErrorResponse> {
    match state.executions.find_by_name(&name).await? {
        Some(execution) => Ok(Json(SuccessResponse::new(execution))),
        None => {
            tracing::warn!(execution_name = %name, "Execution not found");
            Err(ErrorResponse::new(
                "not_found",
                format!("Execution not found: {}", name),
            ))
        }
    }
}

/// Current lifecycle state as derived from the cluster
#[tracing::instrument(skip(state))]
pub async fn get_execution_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse<ExecutionStatusView>>, ErrorResponse> {
    let observed = state.engine.describe(&name).await?;

    Ok(Json(SuccessResponse::new(ExecutionStatusView {
        name,
        status: observed.status,
        reason: observed.reason,
    })))
}

/// Stream the execution's pod output as plain text until the pod exits or
/// the client disconnects
#[tracing::instrument(skip(state))]
pub async fn stream_execution_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, ErrorResponse> {
    let wait = Duration::from_secs(
        query
            .wait_seconds
            .unwrap_or(state.config.logs.process_wait_seconds),
    );
    let logs = state.engine.stream_logs(&name, wait).await?;
    let chunk_size = state.config.logs.read_buffer_size;

    // Dropping the body drops the stream, which stops the cluster pump
    let chunks = futures::stream::unfold(Some(logs), move |logs| async move {
        let Some(mut logs) = logs else {
            return None;
        };
        let mut buf = vec![0u8; chunk_size];
        match logs.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(logs)))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Log stream ended with error");
                Some((Err(e), None))
            }
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(chunks),
    )
        .into_response())
}
