// Slack incoming-webhook observer

use super::{Event, Observer};
use crate::errors::NotificationError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

const OBSERVER_NAME: &str = "slack";

pub struct SlackObserver {
    client: Client,
    url: String,
}

impl SlackObserver {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| delivery_error(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

/// The message body: `{"text": "<content as JSON>"}`
pub fn slack_payload(content: &BTreeMap<String, String>) -> Result<serde_json::Value, NotificationError> {
    let text = serde_json::to_string(content)
        .map_err(|e| delivery_error(format!("Failed to encode event content: {}", e)))?;
    Ok(json!({ "text": text }))
}

fn delivery_error(reason: String) -> NotificationError {
    NotificationError::Delivery {
        observer: OBSERVER_NAME.to_string(),
        reason,
    }
}

#[async_trait]
impl Observer for SlackObserver {
    fn name(&self) -> &str {
        OBSERVER_NAME
    }

    #[instrument(skip_all, fields(event_type = event.event_type()))]
    async fn on_notify(&self, event: &dyn Event) -> Result<(), NotificationError> {
        let payload = slack_payload(&event.content())?;

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| delivery_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(delivery_error(format!(
                "Slack responded with status {}",
                response.status()
            )));
        }

        debug!("Slack notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionStatus;
    use crate::notification::ExecutionEvent;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> ExecutionEvent {
        ExecutionEvent {
            user_email: "ops@example.com".to_string(),
            execution_name: "busybox-0123456789abcdef".to_string(),
            proc_name: "busybox".to_string(),
            image_tag: "busybox".to_string(),
            args: BTreeMap::from([("SAMPLE_ARG".to_string(), "value".to_string())]),
            status: ExecutionStatus::Created,
            notify_emails: vec![],
        }
    }

    #[test]
    fn test_payload_is_sorted_json_text() {
        let payload = slack_payload(&event().content()).unwrap();
        assert_eq!(
            payload["text"],
            r#"{"Args":"SAMPLE_ARG=value","ExecutionID":"busybox-0123456789abcdef","ImageTag":"busybox","JobName":"busybox","Status":"CREATED"}"#
        );
    }

    #[tokio::test]
    async fn test_posts_payload_to_webhook() {
        let server = MockServer::start().await;
        let expected = slack_payload(&event().content()).unwrap();
        Mock::given(method("POST"))
            .and(path("/services/hook"))
            .and(body_json(&expected))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let observer = SlackObserver::new(
            format!("{}/services/hook", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();
        observer.on_notify(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_delivery_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let observer = SlackObserver::new(server.uri(), Duration::from_secs(5)).unwrap();
        let result = observer.on_notify(&event()).await;
        assert!(matches!(result, Err(NotificationError::Delivery { .. })));
    }
}
