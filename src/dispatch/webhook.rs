use crate::config::WebhookConfig;
use crate::dispatch::{AlertDispatcher, DispatchError};
use crate::notify::NotificationPayload;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// POSTs the payload as JSON. Any non-2xx status is a failure.
pub struct WebhookDispatcher {
    client: Client,
    url: String,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(cfg: &WebhookConfig, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent(concat!("hostmon/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: cfg.url.trim().to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl AlertDispatcher for WebhookDispatcher {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError> {
        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        debug!(url = %self.url, status = resp.status().as_u16(), "webhook accepted alert");
        Ok(())
    }
}
