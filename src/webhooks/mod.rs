//! Inbound webhooks that feed the activity log.
//!
//! | Route                    | Producer          | Signature header        |
//! |--------------------------|-------------------|-------------------------|
//! | `/api/webhooks/github`   | GitHub PR events  | `X-Hub-Signature-256`   |
//! | `/api/webhooks/deploy`   | deploy provider   | `X-Deploy-Signature`    |
//!
//! Both verify the raw body before parsing it. A receiver whose secret is
//! not configured rejects every request.

pub mod alert;
pub mod deploy;
pub mod github;
pub mod signature;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::board::ActivityRecorder;
use crate::errors::WebhookError;
use alert::AlertSink;

pub struct WebhookState {
    pub recorder: ActivityRecorder,
    pub github_secret: Option<String>,
    pub deploy_secret: Option<String>,
    pub alerts: Arc<dyn AlertSink>,
}

pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(
            "/api/webhooks/github",
            get(github::describe).post(github::receive),
        )
        .route(
            "/api/webhooks/deploy",
            get(deploy::describe).post(deploy::receive),
        )
        .with_state(state)
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebhookError::SignatureValidation => {
                (StatusCode::UNAUTHORIZED, "Invalid signature".to_string())
            }
            WebhookError::SecretNotConfigured => {
                tracing::warn!("webhook secret not configured, rejecting request");
                (StatusCode::UNAUTHORIZED, "Invalid signature".to_string())
            }
            WebhookError::MalformedPayload(msg) => (StatusCode::BAD_REQUEST, msg),
            WebhookError::Internal(e) => {
                tracing::error!(error = %e, "webhook processing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::board::{CacheOptions, SyncCache};
    use crate::store::MemoryStore;
    use alert::DeploymentAlert;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    pub const GITHUB_SECRET: &str = "github-test-secret";
    pub const DEPLOY_SECRET: &str = "deploy-test-secret";

    #[derive(Default)]
    pub struct RecordingAlerts {
        pub alerts: Mutex<Vec<DeploymentAlert>>,
    }

    #[async_trait]
    impl AlertSink for RecordingAlerts {
        async fn deployment_failed(&self, alert: &DeploymentAlert) {
            self.alerts.lock().push(alert.clone());
        }
    }

    pub struct Harness {
        pub router: Router,
        pub cache: SyncCache,
        pub alerts: Arc<RecordingAlerts>,
    }

    pub async fn harness(secrets: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache = SyncCache::new(store, CacheOptions::default());
        cache.initialize().await.unwrap();
        let alerts = Arc::new(RecordingAlerts::default());
        let state = Arc::new(WebhookState {
            recorder: ActivityRecorder::new(cache.clone()),
            github_secret: secrets.then(|| GITHUB_SECRET.to_string()),
            deploy_secret: secrets.then(|| DEPLOY_SECRET.to_string()),
            alerts: alerts.clone(),
        });
        Harness {
            router: webhook_router(state),
            cache,
            alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: WebhookError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let (status, body) = body_json(WebhookError::SecretNotConfigured).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid signature");

        let (status, body) = body_json(WebhookError::MalformedPayload("Invalid JSON".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid JSON");

        let (status, body) = body_json(WebhookError::Internal(anyhow::anyhow!("boom"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
    }
}
