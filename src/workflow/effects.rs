//! Side effects that leave the process: notifications and webhooks.
//!
//! Everything else a workflow does goes through the pipeline. These two reach
//! outside systems, so they sit behind [`Effects`] and report failures as
//! [`ActionError`]s the engine can retry.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::model::workflow::NotificationChannel;
use crate::model::{CandidateId, ExecutionId, WorkflowId};

/// Why a single action attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    /// Transient failures are retried with backoff; permanent ones fail the
    /// step at once.
    pub retryable: bool,
}

impl ActionError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<crate::error::Error> for ActionError {
    fn from(err: crate::error::Error) -> Self {
        use crate::error::Error;
        match err {
            Error::Database(_) | Error::Io(_) | Error::Conflict(_) => {
                ActionError::retryable(err.to_string())
            }
            other => ActionError::permanent(other.to_string()),
        }
    }
}

/// A notification with its recipient already resolved to an address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub candidate_id: CandidateId,
    pub channel: NotificationChannel,
    pub address: String,
    pub template: String,
}

/// Body posted to webhook URLs.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub candidate_id: CandidateId,
    pub candidate: serde_json::Value,
}

#[async_trait]
pub trait Effects: Send + Sync {
    async fn send_notification(&self, notification: &Notification) -> Result<(), ActionError>;

    /// Returns the HTTP status of a successful call.
    async fn call_webhook(&self, url: &str, payload: &WebhookPayload) -> Result<u16, ActionError>;
}

/// Logs every effect and reports success. The default for tests and for
/// deployments with no outbound integrations.
#[derive(Debug, Default, Clone)]
pub struct TracingEffects;

#[async_trait]
impl Effects for TracingEffects {
    async fn send_notification(&self, notification: &Notification) -> Result<(), ActionError> {
        info!(
            candidate_id = %notification.candidate_id,
            channel = ?notification.channel,
            address = %notification.address,
            template = %notification.template,
            "notification sent"
        );
        Ok(())
    }

    async fn call_webhook(&self, url: &str, payload: &WebhookPayload) -> Result<u16, ActionError> {
        info!(%url, execution_id = %payload.execution_id, "webhook called");
        Ok(200)
    }
}

/// Posts webhooks over HTTP. Notifications are logged; delivery providers
/// plug in by implementing [`Effects`].
#[derive(Debug, Clone)]
pub struct HttpEffects {
    client: reqwest::Client,
}

impl HttpEffects {
    pub fn new(timeout: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::error::Error::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Effects for HttpEffects {
    async fn send_notification(&self, notification: &Notification) -> Result<(), ActionError> {
        TracingEffects.send_notification(notification).await
    }

    async fn call_webhook(&self, url: &str, payload: &WebhookPayload) -> Result<u16, ActionError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ActionError::retryable(format!("webhook request failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            info!(%url, status = status.as_u16(), "webhook called");
            Ok(status.as_u16())
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(ActionError::retryable(format!("webhook returned {status}")))
        } else {
            Err(ActionError::permanent(format!("webhook returned {status}")))
        }
    }
}
