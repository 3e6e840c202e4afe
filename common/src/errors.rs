// Error handling framework

use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while talking to the cluster API
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Cluster configuration error: {0}")]
    Config(String),

    #[error("Cluster request failed: {0}")]
    Request(String),

    #[error("Cluster API rejected request with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode cluster response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClusterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClusterError::Decode(err.to_string())
        } else {
            ClusterError::Request(err.to_string())
        }
    }
}

/// Execution engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cluster rejected job {job_name}: {source}")]
    ClusterSubmission {
        job_name: String,
        #[source]
        source: ClusterError,
    },

    #[error("No pod ready for {job_name} within {waited:?}")]
    PodNotReadyTimeout { job_name: String, waited: Duration },

    #[error("Log stream failed for {job_name}: {message}")]
    LogStream { job_name: String, message: String },

    #[error("Cluster query failed: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Proc not found: {0}")]
    ProcNotFound(String),
}

/// Failure of the cluster side of a log stream, surfaced to readers as the
/// inner error of an `io::Error`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Log stream for {execution_name} broke: {message}")]
pub struct LogStreamError {
    pub execution_name: String,
    pub message: String,
}

/// Plugin loading errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("failed to load plugin binary from location: {location}")]
    Load { location: String },

    #[error("failed to Lookup plugin binary from location: {location} with Exported Name: {exported}")]
    Lookup { location: String, exported: String },

    #[error("plugin export {exported} is a {found} capability, expected {expected}")]
    TypeMismatch {
        exported: String,
        expected: String,
        found: String,
    },

    #[error("plugin protocol error: {0}")]
    Protocol(String),
}

/// Authentication and authorization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("User {0} is not allowed to perform this operation")]
    Forbidden(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Schedule {0} occurrence already claimed")]
    ClaimConflict(uuid::Uuid),

    #[error("Failed to submit schedule {schedule_id}: {reason}")]
    Submission {
        schedule_id: uuid::Uuid,
        reason: String,
    },

    #[error("Schedule store error: {0}")]
    Store(#[from] DatabaseError),
}

/// Notification delivery errors
#[derive(Error, Debug, Clone)]
pub enum NotificationError {
    #[error("Observer {observer} failed to deliver notification: {reason}")]
    Delivery { observer: String, reason: String },
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// API response error type for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let code = match err {
            EngineError::ExecutionNotFound(_) | EngineError::ProcNotFound(_) => "NOT_FOUND",
            EngineError::PodNotReadyTimeout { .. } => "TIMEOUT",
            EngineError::ClusterSubmission { .. } => "CLUSTER_SUBMISSION_ERROR",
            _ => "EXECUTION_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let code = match err {
            AuthError::InvalidCredentials | AuthError::InvalidToken(_) | AuthError::TokenExpired => {
                "UNAUTHORIZED"
            }
            AuthError::Forbidden(_) => "FORBIDDEN",
            AuthError::Plugin(_) => "AUTH_PLUGIN_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        ApiError::new("SCHEDULE_ERROR", err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        let code = match err {
            DatabaseError::NotFound(_) => "NOT_FOUND",
            DatabaseError::DuplicateKey(_) => "CONFLICT",
            _ => "STORAGE_ERROR",
        };
        ApiError::new(code, err.to_string())
    }
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(err.to_string())
    }
}
