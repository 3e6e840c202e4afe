// Generic webhook observer with HMAC-SHA256 payload signatures

use super::{Event, Observer};
use crate::errors::NotificationError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

const OBSERVER_NAME: &str = "webhook";

/// Header carrying the hex-encoded signature of the raw body
pub const SIGNATURE_HEADER: &str = "X-Procyard-Signature";

pub struct WebhookObserver {
    client: Client,
    url: String,
    secret: String,
}

impl WebhookObserver {
    pub fn new(
        url: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| delivery_error(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            secret: secret.into(),
        })
    }
}

/// Hex HMAC-SHA256 of `payload` under `secret`
pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String, NotificationError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| delivery_error(format!("Invalid webhook secret: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Receiver-side check of a signature produced by [`sign_payload`]
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

fn delivery_error(reason: String) -> NotificationError {
    NotificationError::Delivery {
        observer: OBSERVER_NAME.to_string(),
        reason,
    }
}

#[async_trait]
impl Observer for WebhookObserver {
    fn name(&self) -> &str {
        OBSERVER_NAME
    }

    #[instrument(skip_all, fields(event_type = event.event_type()))]
    async fn on_notify(&self, event: &dyn Event) -> Result<(), NotificationError> {
        let body = serde_json::to_vec(&json!({
            "event_type": event.event_type(),
            "user": event.user(),
            "content": event.content(),
        }))
        .map_err(|e| delivery_error(format!("Failed to encode event: {}", e)))?;
        let signature = sign_payload(&body, &self.secret)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| delivery_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(delivery_error(format!(
                "Webhook responded with status {}",
                response.status()
            )));
        }

        debug!("Webhook notification delivered");
        Ok(())
    }
}
