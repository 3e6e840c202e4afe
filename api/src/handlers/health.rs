use axum::{extract::State, Json};
use serde::Serialize;

use crate::handlers::SuccessResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub auth_plugin: &'static str,
}

/// Health check endpoint
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<SuccessResponse<HealthStatus>> {
    Json(SuccessResponse::new(HealthStatus {
        status: "ok",
        auth_plugin: state.security.state_name().await,
    }))
}
