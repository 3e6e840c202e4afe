use axum::{
    extract::{Path, State},
    Json,
};

use crate::handlers::{ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::ProcDefinition;

/// List the proc catalogue
#[tracing::instrument(skip(state))]
pub async fn list_procs(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<ProcDefinition>>>, ErrorResponse> {
    let procs = state.procs.list().await?;

    tracing::info!(count = procs.len(), "Listed procs");
    Ok(Json(SuccessResponse::new(procs)))
}

/// Describe one proc, including the arguments it documents
#[tracing::instrument(skip(state))]
pub async fn get_proc(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse<ProcDefinition>>, ErrorResponse> {
    find_proc(&state, &name).await.map(|p| Json(SuccessResponse::new(p)))
}

pub(crate) async fn find_proc(state: &AppState, name: &str) -> Result<ProcDefinition, ErrorResponse> {
    match state.procs.find_by_name(name).await? {
        Some(proc_def) => Ok(proc_def),
        None => {
            tracing::warn!(proc_name = %name, "Proc not found");
            Err(ErrorResponse::new(
                "not_found",
                format!("Proc not found: {}", name),
            ))
        }
    }
}
