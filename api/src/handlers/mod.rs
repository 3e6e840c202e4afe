pub mod executions;
pub mod health;
pub mod metrics;
pub mod procs;
pub mod schedules;

// Common response types
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::errors::{ApiError, AuthError, DatabaseError, EngineError, ScheduleError};
use common::models::UserIdentity;
use common::security::Auth;
use serde::Serialize;

/// Standard API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub trace_id: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        match self.error.as_str() {
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "forbidden" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            "cluster_submission_error" => StatusCode::BAD_GATEWAY,
            "auth_plugin_error" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

impl From<ApiError> for ErrorResponse {
    fn from(err: ApiError) -> Self {
        let response = ErrorResponse::new(err.code.to_lowercase(), err.message);
        match err.details {
            Some(details) => response.with_details(details),
            None => response,
        }
    }
}

impl From<EngineError> for ErrorResponse {
    fn from(err: EngineError) -> Self {
        ApiError::from(err).into()
    }
}

impl From<AuthError> for ErrorResponse {
    fn from(err: AuthError) -> Self {
        ApiError::from(err).into()
    }
}

impl From<DatabaseError> for ErrorResponse {
    fn from(err: DatabaseError) -> Self {
        tracing::error!(error = %err, "Store operation failed");
        ApiError::from(err).into()
    }
}

impl From<ScheduleError> for ErrorResponse {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::InvalidCronExpression { .. } | ScheduleError::InvalidTimezone(_) => {
                ErrorResponse::new("validation_error", err.to_string())
            }
            _ => ApiError::from(err).into(),
        }
    }
}

/// Require `user` to belong to `group`
pub(crate) async fn authorize(
    state: &crate::state::AppState,
    user: &UserIdentity,
    group: &str,
) -> Result<(), ErrorResponse> {
    if state.security.verify(user, &[group.to_string()]).await? {
        Ok(())
    } else {
        tracing::warn!(email = %user.email, group = %group, "User lacks group membership");
        Err(AuthError::Forbidden(user.email.clone()).into())
    }
}

/// Standard API success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for SuccessResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_engine_errors_map_to_status_codes() {
        let err: ErrorResponse = EngineError::ExecutionNotFound("x".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ErrorResponse = EngineError::PodNotReadyTimeout {
            job_name: "busybox-1".to_string(),
            waited: Duration::from_secs(1),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_auth_errors_map_to_status_codes() {
        let err: ErrorResponse = AuthError::TokenExpired.into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err: ErrorResponse = AuthError::Forbidden("ops@example.com".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_invalid_cron_is_validation_error() {
        let err: ErrorResponse = ScheduleError::InvalidCronExpression {
            expression: "nope".to_string(),
            reason: "bad".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
