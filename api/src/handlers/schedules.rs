use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;

use crate::handlers::procs::find_proc;
use crate::handlers::{authorize, ErrorResponse, SuccessResponse};
use crate::state::AppState;
use common::models::{NewSchedule, ScheduleDefinition, UserIdentity};
use common::schedule::{parse_cron_expression, parse_timezone};

/// Register a recurring run of a proc
#[tracing::instrument(skip(state, user, body), fields(email = %user.email, proc_name = %body.proc_name))]
pub async fn create_schedule(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Json(body): Json<NewSchedule>,
) -> Result<(StatusCode, Json<SuccessResponse<ScheduleDefinition>>), ErrorResponse> {
    parse_cron_expression(&body.time)?;
    if let Some(timezone) = &body.timezone {
        parse_timezone(timezone)?;
    }
    if body.group.trim().is_empty() {
        return Err(ErrorResponse::new(
            "validation_error",
            "Schedule group cannot be empty",
        ));
    }

    let proc_def = find_proc(&state, &body.proc_name).await?;
    authorize(&state, &user, &proc_def.group).await?;
    // The schedule's own group governs deletion later on
    if body.group != proc_def.group {
        authorize(&state, &user, &body.group).await?;
    }

    let schedule = body.into_definition(&user.email);
    state.schedules.create(&schedule).await?;

    tracing::info!(
        schedule_id = %schedule.id,
        time = %schedule.time,
        "Schedule created"
    );
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(schedule))))
}

#[tracing::instrument(skip(state))]
pub async fn list_schedules(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse<Vec<ScheduleDefinition>>>, ErrorResponse> {
    let schedules = state.schedules.list().await?;

    tracing::info!(count = schedules.len(), "Listed schedules");
    Ok(Json(SuccessResponse::new(schedules)))
}

#[tracing::instrument(skip(state))]
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<ScheduleDefinition>>, ErrorResponse> {
    find_schedule(&state, id)
        .await
        .map(|s| Json(SuccessResponse::new(s)))
}

/// Remove a schedule; only members of the schedule's group may do so
#[tracing::instrument(skip(state, user), fields(email = %user.email))]
pub async fn delete_schedule(
    State(state): State<AppState>,
    Extension(user): Extension<UserIdentity>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ErrorResponse> {
    let schedule = find_schedule(&state, id).await?;
    authorize(&state, &user, &schedule.group).await?;

    if !state.schedules.delete(id).await? {
        // Removed concurrently between lookup and delete
        return Err(not_found(id));
    }

    tracing::info!(schedule_id = %id, "Schedule deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn find_schedule(state: &AppState, id: Uuid) -> Result<ScheduleDefinition, ErrorResponse> {
    state
        .schedules
        .find_by_id(id)
        .await?
        .ok_or_else(|| not_found(id))
}

fn not_found(id: Uuid) -> ErrorResponse {
    ErrorResponse::new("not_found", format!("Schedule not found: {}", id))
}
