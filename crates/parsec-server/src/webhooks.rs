//! Best-effort delivery of sequestered ciphertexts to webhook services.
//!
//! Delivery never blocks nor fails the client write: the vlob handler
//! spawns a dispatch task and returns. Failures after the retry budget
//! are logged and surfaced on the event bus for monitoring.

use std::sync::Arc;
use std::time::Duration;

use parsec_types::{OrganizationID, SequesterServiceID, VlobID};

use crate::config::ServerConfig;
use crate::events::{Event, EventBus};

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    config: Arc<ServerConfig>,
    event_bus: EventBus,
}

impl WebhookDispatcher {
    pub fn new(config: Arc<ServerConfig>, event_bus: EventBus) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            event_bus,
        }
    }

    /// Spawn a delivery task for one sequestered ciphertext.
    pub fn dispatch(
        &self,
        organization_id: OrganizationID,
        service_id: SequesterServiceID,
        url: String,
        vlob_id: VlobID,
        ciphertext: Vec<u8>,
    ) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher
                .deliver(organization_id, service_id, url, vlob_id, ciphertext)
                .await;
        });
    }

    async fn deliver(
        &self,
        organization_id: OrganizationID,
        service_id: SequesterServiceID,
        url: String,
        vlob_id: VlobID,
        ciphertext: Vec<u8>,
    ) {
        let max_attempts = self.config.webhook.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let outcome = self
                .client
                .post(&url)
                .query(&[
                    ("organization_id", organization_id.to_string()),
                    ("service_id", service_id.to_string()),
                    ("vlob_id", vlob_id.to_string()),
                ])
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(ciphertext.clone())
                .send()
                .await;
            match outcome {
                Ok(response) if response.status().is_success() => return,
                Ok(response) => {
                    tracing::warn!(
                        organization = %organization_id,
                        service = %service_id,
                        status = %response.status(),
                        attempt,
                        "sequester webhook rejected payload"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        organization = %organization_id,
                        service = %service_id,
                        %error,
                        attempt,
                        "sequester webhook unreachable"
                    );
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(Duration::from_millis(
                    self.config.webhook.retry_backoff_ms * u64::from(attempt),
                ))
                .await;
            }
        }
        self.event_bus
            .emit(&organization_id, Event::SequesterWebhookFailed { service_id });
    }
}
