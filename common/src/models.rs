use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Proc Models
// ============================================================================

/// ProcDefinition is a named, reusable job template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcDefinition {
    pub name: String,
    pub description: String,
    pub image: String,
    /// Default container command, replaced wholesale by a request override
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    pub group: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub contributors: String,
    /// Documented arguments the proc accepts (name → description)
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

/// Container resource requests and limits, e.g. `cpu = "250m"`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

impl ResourceRequirements {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

// ============================================================================
// Execution Models
// ============================================================================

/// ExecutionRequest asks the engine to run a proc once
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub proc_name: String,
    /// Replaces the proc's default command when non-empty
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(proc_name: impl Into<String>) -> Self {
        Self {
            proc_name: proc_name.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }
}

/// Execution is one run of a proc, materialized as a cluster Job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub name: String,
    pub proc_name: String,
    pub image_tag: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub requester: String,
    pub status: ExecutionStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// ExecutionStatus represents the lifecycle of an execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Created,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::TimedOut
        )
    }

    /// Position in the lifecycle; terminal states share the last rank
    pub fn rank(&self) -> u8 {
        match self {
            ExecutionStatus::Created => 0,
            ExecutionStatus::Running => 1,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::TimedOut => 2,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Created => write!(f, "CREATED"),
            ExecutionStatus::Running => write!(f, "RUNNING"),
            ExecutionStatus::Succeeded => write!(f, "SUCCEEDED"),
            ExecutionStatus::Failed => write!(f, "FAILED"),
            ExecutionStatus::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(ExecutionStatus::Created),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "SUCCEEDED" => Ok(ExecutionStatus::Succeeded),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "TIMED_OUT" => Ok(ExecutionStatus::TimedOut),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

impl TryFrom<String> for ExecutionStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// Status plus the terminal reason reported by the cluster, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub status: ExecutionStatus,
    pub reason: Option<String>,
}

// ============================================================================
// Schedule Models
// ============================================================================

/// ScheduleDefinition is a recurring trigger for a proc
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub id: Uuid,
    pub proc_name: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    /// Cron expression, 5 fields (minute precision) or 6/7 fields
    pub time: String,
    #[serde(default)]
    pub timezone: Option<String>,
    pub group: String,
    #[serde(default)]
    pub notify_emails: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user_email: String,
    pub enabled: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields a caller supplies to create a schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub proc_name: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    pub time: String,
    #[serde(default)]
    pub timezone: Option<String>,
    pub group: String,
    pub notify_emails: Vec<String>,
    pub tags: Vec<String>,
}

impl NewSchedule {
    pub fn into_definition(self, user_email: impl Into<String>) -> ScheduleDefinition {
        ScheduleDefinition {
            id: Uuid::new_v4(),
            proc_name: self.proc_name,
            args: self.args,
            time: self.time,
            timezone: self.timezone,
            group: self.group,
            notify_emails: self.notify_emails,
            tags: self.tags,
            user_email: user_email.into(),
            enabled: true,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Identity Models
// ============================================================================

/// UserIdentity is what the security capability hands back on authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub name: String,
    pub email: String,
    pub active: bool,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Render an env map the way notifications and listings show it
pub fn format_args(args: &BTreeMap<String, String>) -> String {
    args.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `KEY=VALUE` pairs; entries without `=` are rejected
pub fn parse_args<I, S>(pairs: I) -> Result<BTreeMap<String, String>, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = BTreeMap::new();
    for pair in pairs {
        let pair = pair.as_ref();
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                args.insert(key.to_string(), value.to_string());
            }
            _ => return Err(format!("Invalid argument '{}', expected KEY=VALUE", pair)),
        }
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            ExecutionStatus::Created,
            ExecutionStatus::Running,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::TimedOut,
        ] {
            assert_eq!(status.to_string().parse::<ExecutionStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_status_rank_orders_lifecycle() {
        assert!(ExecutionStatus::Created.rank() < ExecutionStatus::Running.rank());
        assert!(ExecutionStatus::Running.rank() < ExecutionStatus::TimedOut.rank());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(["SAMPLE_ARG=value", "EMPTY="]).unwrap();
        assert_eq!(args.get("SAMPLE_ARG").map(String::as_str), Some("value"));
        assert_eq!(args.get("EMPTY").map(String::as_str), Some(""));
        assert!(parse_args(["novalue"]).is_err());
        assert!(parse_args(["=value"]).is_err());
    }

    #[test]
    fn test_format_args_is_sorted() {
        let args = parse_args(["B=2", "A=1"]).unwrap();
        assert_eq!(format_args(&args), "A=1 B=2");
    }
}
