//! Notification channel - tells operators a drill started, converged or failed
//!
//! Publishing is detached from the controller: `publish_detached` spawns the
//! send and only logs failures. A notifier can never block or fail a run.

use crate::config::NotifySettings;
use crate::error::ApiError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), ApiError>;
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), ApiError> {
        info!(subject, "{}", message);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    message: &'a str,
}

/// POSTs `{subject, message}` JSON to a webhook
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::Unavailable(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, subject: &str, message: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { subject, message })
            .send()
            .await
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Rejected(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Build the notifier described by the configuration, if any
pub fn from_settings(settings: &NotifySettings) -> Option<Arc<dyn Notifier>> {
    if !settings.enabled {
        return None;
    }
    match &settings.webhook_url {
        Some(url) => match WebhookNotifier::new(url.clone()) {
            Ok(notifier) => Some(Arc::new(notifier)),
            Err(e) => {
                warn!("Webhook notifier unavailable, falling back to log: {}", e);
                Some(Arc::new(LogNotifier))
            }
        },
        None => Some(Arc::new(LogNotifier)),
    }
}

/// Publish on a spawned task. The handle never carries an error; failures
/// are only logged.
pub fn publish_detached(
    notifier: &Arc<dyn Notifier>,
    subject: String,
    message: String,
) -> JoinHandle<()> {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.publish(&subject, &message).await {
            warn!(subject = %subject, "Notification failed: {}", e);
        }
    })
}
