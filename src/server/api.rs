use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::board::models::{ColumnView, NewTask, TaskPatch};
use crate::board::{BoardViewModel, DropTarget, SyncState};
use crate::errors::{BoardError, SyncError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub board: Arc<BoardViewModel>,
    pub ws_tx: broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardResponse {
    pub columns: Vec<ColumnView>,
    pub sync_state: SyncState,
    pub revision: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub revision: u64,
    pub client_id: String,
    pub initialized: bool,
    pub tasks: usize,
    pub activity: usize,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::TaskNotFound { .. } => ApiError::NotFound(err.to_string()),
            BoardError::EmptyTitle | BoardError::NoActiveDrag => {
                ApiError::BadRequest(err.to_string())
            }
            BoardError::Sync(e) => e.into(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/board", get(get_board))
        .route("/api/board/refresh", post(refresh_board))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", post(move_task))
        .route("/api/activity", get(list_activity).delete(clear_activity))
        .route("/api/sync", get(sync_status))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_board(State(state): State<SharedState>) -> Json<BoardResponse> {
    let cache = state.board.cache();
    Json(BoardResponse {
        columns: state.board.columns(),
        sync_state: cache.sync_state(),
        revision: cache.last_revision(),
    })
}

async fn refresh_board(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let changed = state.board.cache().refresh().await?;
    Ok(Json(serde_json::json!({"changed": changed})))
}

async fn list_tasks(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.board.cache().tasks())
}

async fn create_task(
    State(state): State<SharedState>,
    Json(req): Json<NewTask>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.board.create_task(req)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.board.cache().task(&id) {
        Some(task) => Ok(Json(task)),
        None => Err(ApiError::NotFound(format!("Task {} not found", id))),
    }
}

async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<TaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.board.update_task(&id, req)?))
}

async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.board.delete_task(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(target): Json<DropTarget>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.board.move_task(&id, target)?))
}

async fn list_activity(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.board.cache().activity())
}

async fn clear_activity(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    state.board.recorder().clear().wait().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_status(State(state): State<SharedState>) -> Json<SyncStatus> {
    let cache = state.board.cache();
    Json(SyncStatus {
        state: cache.sync_state(),
        revision: cache.last_revision(),
        client_id: cache.client_id().to_string(),
        initialized: cache.is_initialized(),
        tasks: cache.tasks().len(),
        activity: cache.activity().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{CacheOptions, SyncCache};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn test_app() -> (Router, SharedState) {
        let cache = SyncCache::new(Arc::new(MemoryStore::new()), CacheOptions::default());
        cache.initialize().await.unwrap();
        let (ws_tx, _) = broadcast::channel(16);
        let state = Arc::new(AppState {
            board: Arc::new(BoardViewModel::new(cache)),
            ws_tx,
        });
        (api_router().with_state(state.clone()), state)
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = test_app().await;
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn test_create_task_returns_created() {
        let (app, state) = test_app().await;
        let resp = app
            .oneshot(post_json("/api/tasks", json!({"title": "Write spec", "priority": "high"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let task = json_body(resp).await;
        assert_eq!(task["title"], "Write spec");
        assert_eq!(task["status"], "backlog");
        assert_eq!(task["priority"], "high");
        assert!(task.get("tags").is_none());

        let activity = state.board.cache().activity();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].action, "Created");
    }

    #[tokio::test]
    async fn test_create_task_blank_title_is_bad_request() {
        let (app, _) = test_app().await;
        let resp = app
            .oneshot(post_json("/api/tasks", json!({"title": " "})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_board_has_all_columns() {
        let (app, _) = test_app().await;
        let req = Request::builder().uri("/api/board").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let board = json_body(resp).await;
        let ids: Vec<_> = board["columns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["backlog", "in-progress", "revision", "review", "done"]);
        assert_eq!(board["syncState"], "idle");
    }

    #[tokio::test]
    async fn test_move_task_to_column() {
        let (app, state) = test_app().await;
        let task = state.board.create_task(NewTask::titled("Ship")).unwrap();
        let resp = app
            .oneshot(post_json(
                &format!("/api/tasks/{}/move", task.id),
                json!({"column": "review"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let moved = json_body(resp).await;
        assert_eq!(moved["status"], "review");
        let activity = state.board.cache().activity();
        assert_eq!(activity[0].details.as_deref(), Some("Backlog -> Review"));
    }

    #[tokio::test]
    async fn test_patch_task_updates_fields() {
        let (app, state) = test_app().await;
        let task = state.board.create_task(NewTask::titled("Draft")).unwrap();
        let req = Request::builder()
            .method("PATCH")
            .uri(format!("/api/tasks/{}", task.id))
            .header("content-type", "application/json")
            .body(Body::from(json!({"title": "Final", "tags": ["iris"]}).to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let updated = json_body(resp).await;
        assert_eq!(updated["title"], "Final");
        assert_eq!(updated["history"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let (app, _) = test_app().await;
        let req = Request::builder()
            .method("DELETE")
            .uri("/api/tasks/nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = json_body(resp).await;
        assert_eq!(body["error"], "Task nope not found");
    }

    #[tokio::test]
    async fn test_delete_task_and_clear_activity() {
        let (app, state) = test_app().await;
        let task = state.board.create_task(NewTask::titled("tmp")).unwrap();
        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/api/tasks/{}", task.id))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(state.board.cache().tasks().is_empty());

        let req = Request::builder()
            .method("DELETE")
            .uri("/api/activity")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(state.board.cache().activity().is_empty());
    }

    #[tokio::test]
    async fn test_sync_status_reports_initialized() {
        let (app, _) = test_app().await;
        let req = Request::builder().uri("/api/sync").body(Body::empty()).unwrap();
        let body = json_body(app.oneshot(req).await.unwrap()).await;
        assert_eq!(body["initialized"], true);
        assert_eq!(body["state"], "idle");
        assert_eq!(body["tasks"], 0);
    }

    #[tokio::test]
    async fn test_refresh_reports_no_change() {
        let (app, _) = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/board/refresh")
            .body(Body::empty())
            .unwrap();
        let body = json_body(app.oneshot(req).await.unwrap()).await;
        assert_eq!(body["changed"], false);
    }
}
