use axum::{
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::board::{ActivityItem, SaveFailure, SyncCache, SyncState, Task};
use crate::board::observer::Subscription;
use super::api::SharedState;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    TasksChanged { tasks: Vec<Task> },
    ActivityChanged { activity: Vec<ActivityItem> },
    /// Non-blocking "changes could not be saved" banner.
    SaveFailed {
        revision: u64,
        attempts: u32,
        message: String,
    },
    SyncState { state: SyncState },
}

/// Bridges cache observers to the WebSocket broadcast channel. Dropping it
/// stops the bridge.
pub struct LiveFeed {
    _subscriptions: Vec<Subscription>,
}

impl LiveFeed {
    pub fn attach(cache: &SyncCache, tx: broadcast::Sender<String>) -> Self {
        let tasks_tx = tx.clone();
        let activity_tx = tx.clone();
        let error_tx = tx.clone();
        let state_tx = tx;
        Self {
            _subscriptions: vec![
                cache.on_tasks(move |tasks| {
                    broadcast_message(&tasks_tx, &WsMessage::TasksChanged { tasks: tasks.clone() })
                }),
                cache.on_activity(move |activity| {
                    broadcast_message(
                        &activity_tx,
                        &WsMessage::ActivityChanged {
                            activity: activity.clone(),
                        },
                    )
                }),
                cache.on_error(move |failure: &SaveFailure| {
                    broadcast_message(
                        &error_tx,
                        &WsMessage::SaveFailed {
                            revision: failure.revision,
                            attempts: failure.attempts,
                            message: failure.message.clone(),
                        },
                    )
                }),
                cache.on_state(move |state| {
                    broadcast_message(&state_tx, &WsMessage::SyncState { state: *state })
                }),
            ],
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

/// `/ws` upgrade handler. Each client subscribes to the shared live feed.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (sender, receiver) = socket.split();
    let rx = state.ws_tx.subscribe();
    tracing::debug!(clients = state.ws_tx.receiver_count(), "websocket client connected");
    run_socket_loop(sender, receiver, rx).await;
    tracing::debug!("websocket client disconnected");
}

/// Forward broadcast messages, drain client frames and keep the connection
/// alive with ping/pong. A missing Pong for [`PONG_TIMEOUT`] ends the loop.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket client lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Serialize and broadcast a WsMessage. No connected clients is not an error.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize websocket message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{CacheOptions, NewTask};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_ws_message_wire_shape() {
        let msg = WsMessage::SyncState {
            state: SyncState::ErrorSignaled,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "SyncState");
        assert_eq!(json["data"]["state"], "error_signaled");
    }

    #[test]
    fn test_ws_message_parses_back() {
        let raw = r#"{"type":"SyncState","data":{"state":"saving"}}"#;
        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, WsMessage::SyncState { state: SyncState::Saving }));
    }

    #[test]
    fn test_broadcast_without_receivers_is_silent() {
        let (tx, _) = broadcast::channel(4);
        broadcast_message(&tx, &WsMessage::ActivityChanged { activity: vec![] });
    }

    #[tokio::test]
    async fn test_live_feed_forwards_cache_changes() {
        let cache = SyncCache::new(Arc::new(MemoryStore::new()), CacheOptions::default());
        cache.initialize().await.unwrap();
        let (tx, mut rx) = broadcast::channel(16);
        let _feed = LiveFeed::attach(&cache, tx);

        let _ = cache.update_tasks(|tasks| tasks.push(crate::board::Task::new(NewTask::titled("live"))));

        let mut types = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
            types.push(value["type"].as_str().unwrap().to_string());
        }
        assert!(types.contains(&"TasksChanged".to_string()));
        assert!(types.contains(&"SyncState".to_string()));
    }

    #[tokio::test]
    async fn test_dropping_feed_stops_forwarding() {
        let cache = SyncCache::new(Arc::new(MemoryStore::new()), CacheOptions::default());
        cache.initialize().await.unwrap();
        let (tx, mut rx) = broadcast::channel(16);
        drop(LiveFeed::attach(&cache, tx.clone()));
        let _ = cache.update_tasks(|tasks| tasks.push(crate::board::Task::new(NewTask::titled("quiet"))));
        assert!(rx.try_recv().is_err());
    }
}
