//! Alert delivery to wallet owners
//!
//! The chat transport is external; the engine only needs "deliver this text
//! to this owner".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::NotifyConfig;
use crate::error::{Error, Result};
use crate::wallet::OwnerId;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver_message(&self, owner: &OwnerId, text: &str) -> Result<()>;
}

/// Writes alerts to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver_message(&self, owner: &OwnerId, text: &str) -> Result<()> {
        info!(owner = %owner, "{}", text);
        Ok(())
    }
}

/// Webhook payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertPayload<'a> {
    owner_id: &'a str,
    text: &'a str,
}

/// POSTs alerts as JSON to a chat bridge
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver_message(&self, owner: &OwnerId, text: &str) -> Result<()> {
        let payload = AlertPayload {
            owner_id: owner.as_str(),
            text,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Notification(format!(
                "webhook answered {} for owner {}",
                status, owner
            )));
        }

        debug!("Delivered alert to {} via webhook", owner);
        Ok(())
    }
}

/// Pick the notifier the configuration asks for
pub fn from_config(config: &NotifyConfig) -> Result<Arc<dyn Notifier>> {
    if config.webhook_url.trim().is_empty() {
        Ok(Arc::new(LogNotifier))
    } else {
        Ok(Arc::new(WebhookNotifier::new(config.webhook_url.trim())?))
    }
}
