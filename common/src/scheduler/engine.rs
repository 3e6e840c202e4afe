// Scheduler engine implementation

use crate::config::Settings;
use crate::db::{ProcRepository, ScheduleRepository};
use crate::engine::ExecutionSubmitter;
use crate::errors::{ConfigError, ScheduleError};
use crate::models::{Execution, ExecutionRequest, ScheduleDefinition};
use crate::notification::{ExecutionEvent, NotificationDispatcher};
use crate::schedule::{self, ScheduleTrigger};
use crate::telemetry;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Annotation keys stamped on scheduled executions
pub const SCHEDULE_ID_ANNOTATION: &str = "procyard.io/schedule-id";
pub const SCHEDULE_GROUP_ANNOTATION: &str = "procyard.io/schedule-group";
pub const SCHEDULE_TAGS_ANNOTATION: &str = "procyard.io/schedule-tags";

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Maximum number of due schedules handled per tick
    pub max_schedules_per_tick: usize,
    /// Timezone for schedules that do not name one
    pub default_timezone: Tz,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_schedules_per_tick: 100,
            default_timezone: chrono_tz::UTC,
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let default_timezone = schedule::parse_timezone(&settings.scheduler.default_timezone)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Self {
            interval: Duration::from_secs(settings.scheduler.fetch_interval_minutes * 60),
            max_schedules_per_tick: settings.scheduler.max_schedules_per_tick,
            default_timezone,
        })
    }

    /// Override the tick period, e.g. for sub-minute test loops
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Ticking,
    Stopped,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub triggered: usize,
    pub conflicts: usize,
    pub failures: usize,
}

/// State shared between the loop and the tick tasks it spawns
struct TickWorker {
    config: SchedulerConfig,
    schedules: Arc<dyn ScheduleRepository>,
    procs: Arc<dyn ProcRepository>,
    submitter: Arc<dyn ExecutionSubmitter>,
    notifier: Option<Arc<NotificationDispatcher>>,
    ticking: AtomicBool,
    stopping: AtomicBool,
}

impl TickWorker {
    /// Take the tick slot; false when a tick is already in flight
    fn try_begin(&self) -> bool {
        self.ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.ticking.store(false, Ordering::Release);
    }

    #[instrument(skip(self))]
    async fn run_tick(&self) -> TickReport {
        telemetry::record_scheduler_tick();
        let mut report = TickReport::default();
        let now = Utc::now();

        let schedules = match self.schedules.find_enabled().await {
            Ok(schedules) => schedules,
            Err(e) => {
                error!(error = %e, "Failed to query schedules from store");
                telemetry::record_schedule_failure("store");
                return report;
            }
        };

        let due: Vec<ScheduleDefinition> = schedules
            .into_iter()
            .filter(|s| self.is_due(s, now))
            .take(self.config.max_schedules_per_tick)
            .collect();
        report.due = due.len();

        debug!(due = report.due, "Found due schedules");

        for schedule in &due {
            if self.stopping.load(Ordering::Acquire) {
                info!("Shutdown requested, leaving remaining schedules for the next run");
                break;
            }

            match self.trigger(schedule, now).await {
                Ok(execution) => {
                    report.triggered += 1;
                    info!(
                        schedule_id = %schedule.id,
                        execution_name = %execution.name,
                        "Scheduled execution submitted"
                    );
                }
                Err(ScheduleError::ClaimConflict(id)) => {
                    report.conflicts += 1;
                    debug!(schedule_id = %id, "Occurrence already claimed elsewhere");
                }
                Err(e) => {
                    report.failures += 1;
                    telemetry::record_schedule_failure(failure_reason(&e));
                    error!(schedule_id = %schedule.id, error = %e, "Failed to trigger schedule");
                }
            }
        }

        if report.triggered > 0 || report.failures > 0 {
            info!(
                due = report.due,
                triggered = report.triggered,
                conflicts = report.conflicts,
                failures = report.failures,
                "Scheduler tick finished"
            );
        }

        report
    }

    fn is_due(&self, schedule: &ScheduleDefinition, now: DateTime<Utc>) -> bool {
        match schedule.is_due(now, self.config.default_timezone) {
            Ok(due) => due,
            Err(e) => {
                warn!(schedule_id = %schedule.id, error = %e, "Skipping schedule with invalid time spec");
                false
            }
        }
    }

    /// Claim one occurrence, then submit it; the claim is never undone
    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.id, proc_name = %schedule.proc_name))]
    async fn trigger(
        &self,
        schedule: &ScheduleDefinition,
        now: DateTime<Utc>,
    ) -> Result<Execution, ScheduleError> {
        let claimed = self
            .schedules
            .claim_occurrence(schedule.id, schedule.last_triggered_at, now)
            .await?;
        if !claimed {
            return Err(ScheduleError::ClaimConflict(schedule.id));
        }

        let proc_def = self
            .procs
            .find_by_name(&schedule.proc_name)
            .await?
            .ok_or_else(|| ScheduleError::Submission {
                schedule_id: schedule.id,
                reason: format!("proc {} not found", schedule.proc_name),
            })?;

        let execution = self
            .submitter
            .submit(&proc_def, &scheduled_request(schedule))
            .await
            .map_err(|e| ScheduleError::Submission {
                schedule_id: schedule.id,
                reason: e.to_string(),
            })?;

        telemetry::record_schedule_triggered(&schedule.proc_name);

        if let Some(notifier) = &self.notifier {
            let event = ExecutionEvent::from_execution(&schedule.user_email, &execution)
                .with_notify_emails(schedule.notify_emails.clone());
            notifier.notify(&event).await;
        }

        Ok(execution)
    }
}

/// The request a schedule occurrence submits
pub fn scheduled_request(schedule: &ScheduleDefinition) -> ExecutionRequest {
    let mut annotations = BTreeMap::new();
    annotations.insert(SCHEDULE_ID_ANNOTATION.to_string(), schedule.id.to_string());
    annotations.insert(SCHEDULE_GROUP_ANNOTATION.to_string(), schedule.group.clone());
    if !schedule.tags.is_empty() {
        annotations.insert(SCHEDULE_TAGS_ANNOTATION.to_string(), schedule.tags.join(","));
    }

    ExecutionRequest::new(&schedule.proc_name)
        .with_env(schedule.args.clone())
        .with_requester(&schedule.user_email)
        .with_annotations(annotations)
}

fn failure_reason(err: &ScheduleError) -> &'static str {
    match err {
        ScheduleError::Store(_) => "store",
        ScheduleError::Submission { reason, .. } if reason.starts_with("proc ") => {
            "proc_not_found"
        }
        ScheduleError::Submission { .. } => "submission",
        _ => "other",
    }
}

/// Timer-driven loop over the schedule store
pub struct SchedulerEngine {
    worker: Arc<TickWorker>,
    shutdown_tx: broadcast::Sender<()>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        schedules: Arc<dyn ScheduleRepository>,
        procs: Arc<dyn ProcRepository>,
        submitter: Arc<dyn ExecutionSubmitter>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            worker: Arc::new(TickWorker {
                config,
                schedules,
                procs,
                submitter,
                notifier: None,
                ticking: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
            }),
            shutdown_tx,
            in_flight: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Dispatch an execution event for every scheduled submission.
    ///
    /// Must be called before the engine is shared.
    pub fn with_notifier(mut self, notifier: Arc<NotificationDispatcher>) -> Self {
        if let Some(worker) = Arc::get_mut(&mut self.worker) {
            worker.notifier = Some(notifier);
        }
        self
    }

    pub fn state(&self) -> SchedulerState {
        if self.stopped.load(Ordering::Acquire) {
            SchedulerState::Stopped
        } else if self.worker.ticking.load(Ordering::Acquire) {
            SchedulerState::Ticking
        } else {
            SchedulerState::Idle
        }
    }

    /// Run the loop until `stop` is called. Ticks run as tasks so the timer
    /// keeps firing; a tick that fires while one is in flight is skipped.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            interval_seconds = self.worker.config.interval.as_secs_f64(),
            max_schedules_per_tick = self.worker.config.max_schedules_per_tick,
            "Starting scheduler engine"
        );

        let mut ticker = interval(self.worker.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Held across the spawn so `stop` either sees the handle
                    // or sees nothing spawned after it
                    let mut in_flight = self.in_flight.lock().await;
                    if self.stopped.load(Ordering::Acquire) {
                        break;
                    }
                    if !self.worker.try_begin() {
                        warn!("Previous tick still in flight, skipping this one");
                        telemetry::record_scheduler_tick_skipped();
                        continue;
                    }

                    let worker = Arc::clone(&self.worker);
                    *in_flight = Some(tokio::spawn(async move {
                        worker.run_tick().await;
                        worker.finish();
                    }));
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler loop exited");
    }

    /// Run one tick inline; `None` when a tick is in flight or the engine
    /// is stopped
    pub async fn tick_now(&self) -> Option<TickReport> {
        if self.stopped.load(Ordering::Acquire) {
            return None;
        }
        if !self.worker.try_begin() {
            telemetry::record_scheduler_tick_skipped();
            return None;
        }

        let report = self.worker.run_tick().await;
        self.worker.finish();
        Some(report)
    }

    /// Stop new ticks and wait for the in-flight one
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        info!("Stopping scheduler engine");

        self.stopped.store(true, Ordering::Release);
        self.worker.stopping.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());

        let handle = self.in_flight.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "In-flight tick panicked");
                self.worker.finish();
            }
        }

        // Inline ticks from `tick_now` are not tracked by a handle
        while self.worker.ticking.load(Ordering::Acquire) {
            sleep(STOP_POLL_INTERVAL).await;
        }

        info!("Scheduler engine stopped gracefully");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn schedule() -> ScheduleDefinition {
        ScheduleDefinition {
            id: Uuid::new_v4(),
            proc_name: "busybox".to_string(),
            args: BTreeMap::from([("SAMPLE_ARG".to_string(), "value".to_string())]),
            time: "*/5 * * * *".to_string(),
            timezone: None,
            group: "ops".to_string(),
            notify_emails: vec!["ops@example.com".to_string()],
            tags: vec!["nightly".to_string(), "batch".to_string()],
            user_email: "owner@example.com".to_string(),
            enabled: true,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_scheduler_config_from_settings() {
        let mut settings = Settings::default();
        settings.scheduler.fetch_interval_minutes = 2;
        settings.scheduler.default_timezone = "Asia/Kolkata".to_string();

        let config = SchedulerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.interval, Duration::from_secs(120));
        assert_eq!(config.default_timezone, chrono_tz::Asia::Kolkata);

        let config = config.with_interval(Duration::from_millis(50));
        assert_eq!(config.interval, Duration::from_millis(50));
    }

    #[test]
    fn test_scheduled_request_carries_schedule_context() {
        let schedule = schedule();
        let request = scheduled_request(&schedule);

        assert_eq!(request.proc_name, "busybox");
        assert_eq!(request.requester, "owner@example.com");
        assert_eq!(request.env, schedule.args);
        assert!(request.command.is_empty());
        assert_eq!(
            request.annotations.get(SCHEDULE_ID_ANNOTATION),
            Some(&schedule.id.to_string())
        );
        assert_eq!(
            request.annotations.get(SCHEDULE_GROUP_ANNOTATION).map(String::as_str),
            Some("ops")
        );
        assert_eq!(
            request.annotations.get(SCHEDULE_TAGS_ANNOTATION).map(String::as_str),
            Some("nightly,batch")
        );
    }

    #[test]
    fn test_failure_reason_labels() {
        let id = Uuid::new_v4();
        let missing = ScheduleError::Submission {
            schedule_id: id,
            reason: "proc busybox not found".to_string(),
        };
        let rejected = ScheduleError::Submission {
            schedule_id: id,
            reason: "Cluster rejected job".to_string(),
        };
        assert_eq!(failure_reason(&missing), "proc_not_found");
        assert_eq!(failure_reason(&rejected), "submission");
    }
}
