use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::WebhookState;
use super::signature::verify_github;
use crate::board::ActivityEvent;
use crate::errors::WebhookError;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Pull request actions that produce an activity entry.
pub const TRACKED_ACTIONS: [&str; 3] = ["opened", "synchronize", "ready_for_review"];

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    title: String,
    html_url: String,
    #[serde(default)]
    user: Option<PrUser>,
    #[serde(default)]
    draft: Option<bool>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrUser {
    login: Option<String>,
}

/// Summary echoed back to the sender.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrInfo {
    pub pr_number: u64,
    pub pr_title: String,
    pub pr_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub action: String,
    pub draft: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl PrInfo {
    fn from_payload(action: &str, pr: PullRequest) -> Self {
        Self {
            pr_number: pr.number,
            pr_title: pr.title,
            pr_url: pr.html_url,
            author: pr.user.and_then(|u| u.login),
            action: action.to_string(),
            draft: pr.draft.unwrap_or(false),
            state: pr.state,
        }
    }

    /// Activity action and details for a tracked action.
    fn activity(&self) -> (String, String) {
        let action = match self.action.as_str() {
            "opened" => "PR Opened".to_string(),
            "ready_for_review" => "PR Ready for Review".to_string(),
            "synchronize" => "PR Updated".to_string(),
            other => format!("PR {}", other),
        };
        let details = if self.action == "opened" && self.draft {
            format!("#{} (Draft) - {}", self.pr_number, self.pr_url)
        } else {
            format!("#{} - {}", self.pr_number, self.pr_url)
        };
        (action, details)
    }
}

pub async fn receive(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = verify_github(state.github_secret.as_deref(), &body, signature) {
        tracing::warn!(source = "github", "rejected webhook: {}", e);
        return Err(e);
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| WebhookError::MalformedPayload("Invalid JSON".into()))?;

    let action = payload.get("action");
    let pull_request = payload.get("pull_request").filter(|pr| is_truthy(pr));
    let (Some(action), Some(pull_request)) = (action, pull_request) else {
        tracing::debug!("not a pull request event, ignoring");
        return Ok(Json(json!({"success": true, "message": "Not a PR event"})));
    };

    let action = action.as_str().unwrap_or_default();
    if !TRACKED_ACTIONS.contains(&action) {
        tracing::debug!(action, "pull request action not tracked");
        return Ok(Json(json!({"success": true, "message": "Action not tracked"})));
    }

    let pr: PullRequest = serde_json::from_value(pull_request.clone())
        .map_err(|_| WebhookError::MalformedPayload("Invalid PR data".into()))?;
    let info = PrInfo::from_payload(action, pr);
    let (activity_action, details) = info.activity();

    state
        .recorder
        .record_event(ActivityEvent::PullRequest {
            action: activity_action.clone(),
            title: info.pr_title.clone(),
            details,
        })
        .wait()
        .await
        .map_err(|e| WebhookError::Internal(e.into()))?;
    tracing::info!(pr = info.pr_number, action = %activity_action, "pull request activity logged");

    Ok(Json(json!({
        "success": true,
        "message": "Activity logged",
        "pr": info,
    })))
}

pub async fn describe() -> Json<Value> {
    Json(json!({
        "status": "webhook endpoint active",
        "endpoint": "/api/webhooks/github",
        "accepts": ["pull_request"],
        "actions": TRACKED_ACTIONS,
    }))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
