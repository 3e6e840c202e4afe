// Status projection from cluster Job state, and the tracker that keeps the
// projected lifecycle monotonic for every reader.

use crate::cluster::Job;
use crate::models::{ExecutionState, ExecutionStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;

const CONDITION_TRUE: &str = "True";
const DEADLINE_EXCEEDED: &str = "DeadlineExceeded";

/// Map a Job's status block to an execution state.
///
/// Checks run in order: completion, deadline, failure, then the default of
/// `Running` for any Job the cluster knows about.
pub fn project_status(job: &Job, backoff_limit: i32) -> ExecutionState {
    let Some(status) = job.status.as_ref() else {
        return ExecutionState {
            status: ExecutionStatus::Running,
            reason: None,
        };
    };

    let condition = |kind: &str| {
        status
            .conditions
            .iter()
            .find(|c| c.type_ == kind && c.status == CONDITION_TRUE)
    };

    if condition("Complete").is_some() || status.succeeded.unwrap_or(0) > 0 {
        return ExecutionState {
            status: ExecutionStatus::Succeeded,
            reason: None,
        };
    }

    if let Some(failed) = condition("Failed") {
        let status = if failed.reason.as_deref() == Some(DEADLINE_EXCEEDED) {
            ExecutionStatus::TimedOut
        } else {
            ExecutionStatus::Failed
        };
        let reason = failed.message.clone().or_else(|| failed.reason.clone());
        return ExecutionState { status, reason };
    }

    if status.failed.unwrap_or(0) > backoff_limit {
        return ExecutionState {
            status: ExecutionStatus::Failed,
            reason: Some(format!(
                "{} failed pod(s) exceeded backoff limit {}",
                status.failed.unwrap_or(0),
                backoff_limit
            )),
        };
    }

    ExecutionState {
        status: ExecutionStatus::Running,
        reason: None,
    }
}

/// Outcome of feeding an observation to the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// State every reader sees from now on
    pub state: ExecutionState,
    /// True when the observation moved the lifecycle forward
    pub changed: bool,
}

/// Last known state per execution; never moves backwards and never leaves a
/// terminal state.
#[derive(Debug, Default)]
pub struct StatusTracker {
    states: RwLock<HashMap<String, ExecutionState>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly submitted execution
    pub async fn seed(&self, name: &str) {
        self.states
            .write()
            .await
            .entry(name.to_string())
            .or_insert(ExecutionState {
                status: ExecutionStatus::Created,
                reason: None,
            });
    }

    /// Reinstate a state read back from the store. A state already held in
    /// memory wins. Returns whether the stored state was taken.
    pub async fn restore(&self, name: &str, state: ExecutionState) -> bool {
        let mut states = self.states.write().await;
        if states.contains_key(name) {
            return false;
        }
        states.insert(name.to_string(), state);
        true
    }

    pub async fn current(&self, name: &str) -> Option<ExecutionState> {
        self.states.read().await.get(name).cloned()
    }

    /// Drop an execution the store now answers for
    pub async fn forget(&self, name: &str) {
        self.states.write().await.remove(name);
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }

    /// Merge a new observation with the recorded state
    pub async fn observe(&self, name: &str, observed: ExecutionState) -> Observation {
        let mut states = self.states.write().await;

        match states.get(name) {
            Some(known)
                if known.status.is_terminal()
                    || observed.status.rank() <= known.status.rank() =>
            {
                Observation {
                    state: known.clone(),
                    changed: false,
                }
            }
            _ => {
                states.insert(name.to_string(), observed.clone());
                Observation {
                    state: observed,
                    changed: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::objects::{JobCondition, JobStatus};

    fn job_with(status: JobStatus) -> Job {
        Job {
            status: Some(status),
            ..Default::default()
        }
    }

    fn condition(kind: &str, reason: Option<&str>) -> JobCondition {
        JobCondition {
            type_: kind.to_string(),
            status: "True".to_string(),
            reason: reason.map(str::to_string),
            message: None,
        }
    }

    fn state(status: ExecutionStatus) -> ExecutionState {
        ExecutionState {
            status,
            reason: None,
        }
    }

    #[test]
    fn test_job_without_status_is_running() {
        assert_eq!(
            project_status(&Job::default(), 0).status,
            ExecutionStatus::Running
        );
    }

    #[test]
    fn test_succeeded_count_wins() {
        let job = job_with(JobStatus {
            succeeded: Some(1),
            failed: Some(3),
            ..Default::default()
        });
        assert_eq!(project_status(&job, 0).status, ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_complete_condition() {
        let job = job_with(JobStatus {
            conditions: vec![condition("Complete", None)],
            ..Default::default()
        });
        assert_eq!(project_status(&job, 0).status, ExecutionStatus::Succeeded);
    }

    #[test]
    fn test_deadline_exceeded_is_timed_out() {
        let job = job_with(JobStatus {
            failed: Some(1),
            conditions: vec![condition("Failed", Some("DeadlineExceeded"))],
            ..Default::default()
        });
        let projected = project_status(&job, 0);
        assert_eq!(projected.status, ExecutionStatus::TimedOut);
        assert_eq!(projected.reason.as_deref(), Some("DeadlineExceeded"));
    }

    #[test]
    fn test_backoff_limit_reached_is_failed() {
        let job = job_with(JobStatus {
            failed: Some(1),
            conditions: vec![condition("Failed", Some("BackoffLimitExceeded"))],
            ..Default::default()
        });
        assert_eq!(project_status(&job, 0).status, ExecutionStatus::Failed);
    }

    #[test]
    fn test_failed_count_over_limit_without_condition() {
        let job = job_with(JobStatus {
            failed: Some(3),
            ..Default::default()
        });
        assert_eq!(project_status(&job, 2).status, ExecutionStatus::Failed);
        assert_eq!(project_status(&job, 3).status, ExecutionStatus::Running);
    }

    #[test]
    fn test_false_conditions_are_ignored() {
        let mut failed = condition("Failed", None);
        failed.status = "False".to_string();
        let job = job_with(JobStatus {
            active: Some(1),
            conditions: vec![failed],
            ..Default::default()
        });
        assert_eq!(project_status(&job, 0).status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_tracker_moves_forward() {
        let tracker = StatusTracker::new();
        tracker.seed("a").await;

        let obs = tracker.observe("a", state(ExecutionStatus::Running)).await;
        assert!(obs.changed);
        assert_eq!(obs.state.status, ExecutionStatus::Running);

        let obs = tracker.observe("a", state(ExecutionStatus::Succeeded)).await;
        assert!(obs.changed);
        assert_eq!(obs.state.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_tracker_never_regresses() {
        let tracker = StatusTracker::new();
        tracker.observe("a", state(ExecutionStatus::Running)).await;

        let obs = tracker.observe("a", state(ExecutionStatus::Created)).await;
        assert!(!obs.changed);
        assert_eq!(obs.state.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_tracker_terminal_is_sticky() {
        let tracker = StatusTracker::new();
        tracker.observe("a", state(ExecutionStatus::TimedOut)).await;

        let obs = tracker.observe("a", state(ExecutionStatus::Failed)).await;
        assert!(!obs.changed);
        assert_eq!(obs.state.status, ExecutionStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_seed_does_not_reset_known_state() {
        let tracker = StatusTracker::new();
        tracker.observe("a", state(ExecutionStatus::Running)).await;
        tracker.seed("a").await;
        assert_eq!(
            tracker.current("a").await.map(|s| s.status),
            Some(ExecutionStatus::Running)
        );
    }

    #[tokio::test]
    async fn test_restored_terminal_state_is_sticky() {
        let tracker = StatusTracker::new();
        assert!(tracker.restore("a", state(ExecutionStatus::Succeeded)).await);

        let obs = tracker.observe("a", state(ExecutionStatus::Created)).await;
        assert!(!obs.changed);
        assert_eq!(obs.state.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_restore_keeps_newer_memory_state() {
        let tracker = StatusTracker::new();
        tracker.observe("a", state(ExecutionStatus::Running)).await;
        assert!(!tracker.restore("a", state(ExecutionStatus::Created)).await);
        assert_eq!(
            tracker.current("a").await.map(|s| s.status),
            Some(ExecutionStatus::Running)
        );
    }

    #[tokio::test]
    async fn test_forget_releases_entry() {
        let tracker = StatusTracker::new();
        tracker.observe("a", state(ExecutionStatus::Failed)).await;
        assert_eq!(tracker.len().await, 1);

        tracker.forget("a").await;
        assert!(tracker.is_empty().await);
        assert!(tracker.current("a").await.is_none());
    }
}
