use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde::Deserialize;
use serde_json::{Value, json};

use super::WebhookState;
use super::alert::DeploymentAlert;
use super::signature::verify_deploy;
use crate::board::ActivityEvent;
use crate::errors::WebhookError;

pub const SIGNATURE_HEADER: &str = "x-deploy-signature";

const DEFAULT_PROJECT: &str = "Dashboard";
const FAILED_STATUS: &str = "ERROR";

#[derive(Debug, Deserialize)]
struct DeployPayload {
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    deployment: Option<Deployment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Deployment {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    status: String,
    #[serde(default)]
    creator: Option<Creator>,
}

#[derive(Debug, Deserialize)]
struct Creator {
    #[serde(default)]
    username: Option<String>,
}

/// Human label for a provider status; unknown statuses pass through.
pub fn status_label(status: &str) -> &str {
    match status {
        "BUILDING" => "Building",
        "READY" => "Deployed",
        "ERROR" => "Failed",
        "CANCELED" => "Canceled",
        other => other,
    }
}

fn details(project: &str, deployment: &Deployment) -> String {
    let mut details = format!("{} -> {}", project, deployment.status);
    if let Some(url) = deployment.url.as_deref().filter(|u| !u.is_empty()) {
        details.push_str(&format!(" | {}", url));
    }
    if let Some(user) = deployment
        .creator
        .as_ref()
        .and_then(|c| c.username.as_deref())
        .filter(|u| !u.is_empty())
    {
        details.push_str(&format!(" | by {}", user));
    }
    details
}

pub async fn receive(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = verify_deploy(state.deploy_secret.as_deref(), &body, signature) {
        tracing::warn!(source = "deploy", "rejected webhook: {}", e);
        return Err(e);
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| WebhookError::MalformedPayload("Invalid JSON".into()))?;
    let payload: DeployPayload = serde_json::from_value(payload)
        .map_err(|_| WebhookError::MalformedPayload("Invalid payload".into()))?;
    let Some(deployment) = payload.deployment else {
        return Err(WebhookError::MalformedPayload("Invalid payload".into()));
    };

    let project = deployment
        .project_id
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PROJECT.to_string());
    let label = status_label(&deployment.status).to_string();

    state
        .recorder
        .record_event(ActivityEvent::Deployment {
            label: label.clone(),
            project: project.clone(),
            details: details(&project, &deployment),
        })
        .wait()
        .await
        .map_err(|e| WebhookError::Internal(e.into()))?;
    tracing::info!(
        project = %project,
        status = %deployment.status,
        event = payload.event_type.as_deref().unwrap_or("unknown"),
        "deployment activity logged"
    );

    if deployment.status == FAILED_STATUS {
        state
            .alerts
            .deployment_failed(&DeploymentAlert {
                project,
                deployment_id: deployment.id,
                url: deployment.url,
            })
            .await;
        return Ok(Json(json!({"message": "Deployment failed", "alert": true})));
    }

    Ok(Json(json!({"message": "Deployment logged", "status": deployment.status})))
}

pub async fn describe() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "endpoint": "/api/webhooks/deploy",
        "events": [
            "deployment.created",
            "deployment.succeeded",
            "deployment.failed",
            "deployment.canceled",
        ],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::signature::sign_deploy;
    use crate::webhooks::test_support::{DEPLOY_SECRET, harness};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn signed(body: &str) -> Request<Body> {
        let sig = sign_deploy(DEPLOY_SECRET, body.as_bytes()).unwrap();
        Request::builder()
            .method("POST")
            .uri("/api/webhooks/deploy")
            .header(SIGNATURE_HEADER, sig)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(router: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label("READY"), "Deployed");
        assert_eq!(status_label("BUILDING"), "Building");
        assert_eq!(status_label("QUEUED"), "QUEUED");
    }

    #[tokio::test]
    async fn test_ready_deployment_is_logged() {
        let h = harness(true).await;
        let body = json!({
            "type": "deployment.succeeded",
            "deployment": {
                "id": "dpl_1",
                "url": "iris.example.app",
                "projectId": "iris",
                "status": "READY",
                "creator": {"username": "ana"},
            }
        })
        .to_string();
        let (status, resp) = send(h.router, signed(&body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["message"], "Deployment logged");
        assert_eq!(resp["status"], "READY");

        let activity = h.cache.activity();
        assert_eq!(activity[0].action, "Deployment Deployed");
        assert_eq!(activity[0].task_title, "Deploy: iris");
        assert_eq!(
            activity[0].details.as_deref(),
            Some("iris -> READY | iris.example.app | by ana")
        );
        assert!(h.alerts.alerts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_deployment_fires_alert() {
        let h = harness(true).await;
        let body = json!({"deployment": {"id": "dpl_2", "status": "ERROR"}}).to_string();
        let (status, resp) = send(h.router, signed(&body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp, json!({"message": "Deployment failed", "alert": true}));

        let activity = h.cache.activity();
        assert_eq!(activity[0].action, "Deployment Failed");
        assert_eq!(activity[0].task_title, "Deploy: Dashboard");
        assert_eq!(activity[0].details.as_deref(), Some("Dashboard -> ERROR"));

        let alerts = h.alerts.alerts.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].deployment_id.as_deref(), Some("dpl_2"));
    }

    #[tokio::test]
    async fn test_missing_deployment_is_bad_request() {
        let h = harness(true).await;
        let (status, resp) = send(h.router, signed(r#"{"type":"deployment.created"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp["error"], "Invalid payload");
        assert!(h.cache.activity().is_empty());
    }

    #[tokio::test]
    async fn test_unsigned_request_is_rejected() {
        let h = harness(true).await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/webhooks/deploy")
            .body(Body::from(r#"{"deployment":{"status":"READY"}}"#))
            .unwrap();
        let (status, _) = send(h.router, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(h.cache.activity().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_secret_is_rejected() {
        let h = harness(false).await;
        let body = r#"{"deployment":{"status":"READY"}}"#;
        let (status, _) = send(h.router, signed(body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
