//! HTTP surface: board API, live WebSocket feed and webhook receivers.

pub mod api;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::board::{BoardViewModel, CacheOptions, SyncCache, starter_tasks};
use crate::config::Config;
use crate::store;
use crate::webhooks::alert::{AlertSink, HttpAlertSink, LogAlertSink};
use crate::webhooks::{WebhookState, webhook_router};
use api::AppState;

/// Capacity of the live-feed broadcast channel.
const WS_CHANNEL_CAPACITY: usize = 256;

/// Build the full application router: API, `/ws` and webhooks.
pub fn build_router(state: Arc<AppState>, webhooks: Arc<WebhookState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .merge(webhook_router(webhooks))
}

/// Open the configured store and initialize a cache over it.
///
/// Fails when the board cannot be read; nothing useful can be served then.
pub async fn open_board(config: &Config) -> Result<SyncCache> {
    let store = store::open(&config.store).context("Failed to open board store")?;
    let backend = store.name();
    let cache = SyncCache::new(
        store,
        CacheOptions {
            retry: config.sync.retry_policy(),
            seed: config.sync.seed_on_first_run.then(starter_tasks),
            client_id: None,
        },
    );
    cache
        .initialize()
        .await
        .with_context(|| format!("Board store '{}' is unreachable", backend))?;
    Ok(cache)
}

fn alert_sink(config: &Config) -> Result<Arc<dyn AlertSink>> {
    let sink: Arc<dyn AlertSink> = match config.webhooks.alert_url.as_deref() {
        Some(url) => Arc::new(HttpAlertSink::new(url).context("Failed to build alert client")?),
        None => Arc::new(LogAlertSink),
    };
    Ok(sink)
}

/// Start the board server and run until Ctrl+C.
pub async fn start_server(config: Config) -> Result<()> {
    let cache = open_board(&config).await?;
    let (ws_tx, _rx) = broadcast::channel::<String>(WS_CHANNEL_CAPACITY);
    let _feed = ws::LiveFeed::attach(&cache, ws_tx.clone());

    let board = Arc::new(BoardViewModel::new(cache.clone()));
    let state = Arc::new(AppState {
        board: board.clone(),
        ws_tx,
    });
    let webhooks = Arc::new(WebhookState {
        recorder: board.recorder().clone(),
        github_secret: config.webhooks.github_secret.clone(),
        deploy_secret: config.webhooks.deploy_secret.clone(),
        alerts: alert_sink(&config)?,
    });
    if webhooks.github_secret.is_none() || webhooks.deploy_secret.is_none() {
        tracing::warn!("a webhook secret is not configured; that receiver rejects every request");
    }

    let mut app = build_router(state, webhooks);
    if config.server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        store = %config.store.path.display(),
        revision = cache.last_revision(),
        "task board listening"
    );
    println!("Task board running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cache.shutdown().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{ActivityRecorder, NewTask};
    use crate::config::StoreBackend;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn test_router() -> Router {
        let cache = SyncCache::new(Arc::new(MemoryStore::new()), CacheOptions::default());
        cache.initialize().await.unwrap();
        let board = Arc::new(BoardViewModel::new(cache));
        let (ws_tx, _) = broadcast::channel(16);
        let webhooks = Arc::new(WebhookState {
            recorder: ActivityRecorder::new(board.cache().clone()),
            github_secret: None,
            deploy_secret: None,
            alerts: Arc::new(LogAlertSink),
        });
        build_router(Arc::new(AppState { board, ws_tx }), webhooks)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router().await;
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_routes_mounted() {
        let app = test_router().await;
        let req = Request::builder()
            .uri("/api/webhooks/deploy")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let app = test_router().await;
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn test_open_board_seeds_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.backend = StoreBackend::Local;
        config.store.path = dir.path().to_path_buf();
        config.sync.seed_on_first_run = true;

        let cache = open_board(&config).await.unwrap();
        assert_eq!(cache.tasks().len(), starter_tasks().len());
        cache.shutdown().await;

        // Reopening reads the seeded board instead of seeding again.
        let cache = open_board(&config).await.unwrap();
        assert_eq!(cache.tasks().len(), starter_tasks().len());
        let board = BoardViewModel::new(cache);
        board.create_task(NewTask::titled("Fourth")).unwrap();
        assert_eq!(board.cache().tasks().len(), starter_tasks().len() + 1);
    }
}
