use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Upper bound on one alert delivery.
pub const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

/// A failed deployment worth telling someone about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentAlert {
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Side channel for deployment failures. Delivery is best effort.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deployment_failed(&self, alert: &DeploymentAlert);
}

/// Writes the alert to the log at error level.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deployment_failed(&self, alert: &DeploymentAlert) {
        tracing::error!(
            project = %alert.project,
            deployment = alert.deployment_id.as_deref().unwrap_or("unknown"),
            url = alert.url.as_deref().unwrap_or(""),
            "deployment failure"
        );
    }
}

/// POSTs the alert as JSON to a configured URL, and logs it as well.
pub struct HttpAlertSink {
    client: reqwest::Client,
    url: String,
}

impl HttpAlertSink {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeout(url, ALERT_TIMEOUT)
    }

    /// The deploy receiver awaits delivery, so every request is bounded.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for HttpAlertSink {
    async fn deployment_failed(&self, alert: &DeploymentAlert) {
        LogAlertSink.deployment_failed(alert).await;
        let result = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        if let Err(e) = result {
            tracing::warn!(url = %self.url, error = %e, "failed to deliver deployment alert");
        }
    }
}
