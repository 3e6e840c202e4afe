// Lifecycle notifications: the event contract, observers and the
// best-effort dispatcher that fans events out to them.

pub mod slack;
pub mod webhook;

pub use slack::SlackObserver;
pub use webhook::WebhookObserver;

use crate::config::NotificationConfig;
use crate::errors::NotificationError;
use crate::models::{format_args, Execution, ExecutionStatus};
use crate::telemetry;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const EXECUTION_EVENT_TYPE: &str = "execution";

/// Something observers can be told about
pub trait Event: Send + Sync {
    fn event_type(&self) -> &str;

    /// Email of the user the event happened on behalf of
    fn user(&self) -> &str;

    /// Flat key/value payload, sorted by key
    fn content(&self) -> BTreeMap<String, String>;
}

/// A proc execution was submitted
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionEvent {
    pub user_email: String,
    pub execution_name: String,
    pub proc_name: String,
    pub image_tag: String,
    pub args: BTreeMap<String, String>,
    pub status: ExecutionStatus,
    pub notify_emails: Vec<String>,
}

impl ExecutionEvent {
    pub fn from_execution(user_email: impl Into<String>, execution: &Execution) -> Self {
        Self {
            user_email: user_email.into(),
            execution_name: execution.name.clone(),
            proc_name: execution.proc_name.clone(),
            image_tag: execution.image_tag.clone(),
            args: execution.env.clone(),
            status: execution.status,
            notify_emails: Vec::new(),
        }
    }

    /// Recipients of a scheduled run
    pub fn with_notify_emails(mut self, emails: Vec<String>) -> Self {
        self.notify_emails = emails;
        self
    }
}

impl Event for ExecutionEvent {
    fn event_type(&self) -> &str {
        EXECUTION_EVENT_TYPE
    }

    fn user(&self) -> &str {
        &self.user_email
    }

    fn content(&self) -> BTreeMap<String, String> {
        let mut content = BTreeMap::from([
            ("ExecutionID".to_string(), self.execution_name.clone()),
            ("JobName".to_string(), self.proc_name.clone()),
            ("ImageTag".to_string(), self.image_tag.clone()),
            ("Args".to_string(), format_args(&self.args)),
            ("Status".to_string(), self.status.to_string()),
        ]);
        if !self.notify_emails.is_empty() {
            content.insert("NotifyEmails".to_string(), self.notify_emails.join(","));
        }
        content
    }
}

/// A notification backend
#[async_trait]
pub trait Observer: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &str;

    async fn on_notify(&self, event: &dyn Event) -> Result<(), NotificationError>;
}

/// Writes every event to the structured log
pub struct LogObserver;

#[async_trait]
impl Observer for LogObserver {
    fn name(&self) -> &str {
        "log"
    }

    async fn on_notify(&self, event: &dyn Event) -> Result<(), NotificationError> {
        info!(
            event_type = event.event_type(),
            user = event.user(),
            content = ?event.content(),
            "Notification"
        );
        Ok(())
    }
}

/// Fans events out to every observer concurrently. Delivery failures are
/// logged, counted and returned; they never fail the caller.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    observers: Vec<Arc<dyn Observer>>,
}

impl NotificationDispatcher {
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        Self { observers }
    }

    /// Log observer plus whichever HTTP observers are configured
    pub fn from_config(
        config: &NotificationConfig,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let mut observers: Vec<Arc<dyn Observer>> = vec![Arc::new(LogObserver)];

        if let Some(url) = config.slack_webhook_url.as_deref().filter(|u| !u.is_empty()) {
            observers.push(Arc::new(SlackObserver::new(url, timeout)?));
        }
        if let Some(url) = config.webhook_url.as_deref().filter(|u| !u.is_empty()) {
            let secret = config.webhook_secret.clone().unwrap_or_default();
            observers.push(Arc::new(WebhookObserver::new(url, secret, timeout)?));
        }

        Ok(Self::new(observers))
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    #[instrument(skip_all, fields(event_type = event.event_type()))]
    pub async fn notify(&self, event: &dyn Event) -> Vec<NotificationError> {
        let results = join_all(self.observers.iter().map(|o| o.on_notify(event))).await;

        let mut failures = Vec::new();
        for (observer, result) in self.observers.iter().zip(results) {
            if let Err(e) = result {
                warn!(observer = observer.name(), error = %e, "Notification delivery failed");
                telemetry::record_notification_failure(observer.name());
                failures.push(e);
            }
        }
        failures
    }
}
