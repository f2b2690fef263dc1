use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, broadcast};

use super::{ActivityChange, ClearOutcome, RemoteStore, SUBSCRIPTION_CAPACITY, encode_document};
use crate::board::models::{ActivityItem, BoardDocument, Task};
use crate::board::recorder::ACTIVITY_LIMIT;
use crate::errors::StoreError;

/// Fixed key of the task collection blob.
pub const TASKS_KEY: &str = "iris-kanban-tasks";
/// Fixed key of the activity log blob.
pub const ACTIVITY_KEY: &str = "iris-kanban-activity";

/// Local persisted fallback used when no remote store is reachable.
///
/// Holds two whole-JSON blobs in a directory: the task array under
/// [`TASKS_KEY`] and the newest-first activity array under [`ACTIVITY_KEY`].
/// Every write replaces the blob through a temp file + rename.
pub struct LocalStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on the blobs.
    io_lock: Mutex<()>,
    board_tx: broadcast::Sender<BoardDocument>,
    activity_tx: broadcast::Sender<ActivityChange>,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (board_tx, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        let (activity_tx, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Self {
            dir: dir.into(),
            io_lock: Mutex::new(()),
            board_tx,
            activity_tx,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    async fn read_blob<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let path = self.blob_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(Some(serde_json::from_str(&body)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn write_blob(&self, key: &str, body: String) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
        let path = self.blob_path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Io { path, source })
    }

    async fn read_activity(&self) -> Result<Vec<ActivityItem>, StoreError> {
        Ok(self.read_blob(ACTIVITY_KEY).await?.unwrap_or_default())
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn read_board(&self) -> Result<Option<BoardDocument>, StoreError> {
        let tasks: Option<Vec<Task>> = self.read_blob(TASKS_KEY).await?;
        // The blob carries the task array only; revision restarts at zero.
        Ok(tasks.map(|tasks| BoardDocument::new(tasks, 0, None)))
    }

    async fn write_board(&self, doc: &BoardDocument) -> Result<(), StoreError> {
        let body = encode_document(&doc.tasks)?;
        {
            let _guard = self.io_lock.lock().await;
            self.write_blob(TASKS_KEY, body).await?;
        }
        let _ = self.board_tx.send(doc.clone());
        Ok(())
    }

    fn subscribe_board(&self) -> broadcast::Receiver<BoardDocument> {
        self.board_tx.subscribe()
    }

    async fn append_activity(&self, entry: &ActivityItem) -> Result<(), StoreError> {
        {
            let _guard = self.io_lock.lock().await;
            let mut activity = self.read_activity().await?;
            if activity.iter().any(|a| a.id == entry.id) {
                return Ok(());
            }
            activity.insert(0, entry.clone());
            activity.truncate(ACTIVITY_LIMIT);
            self.write_blob(ACTIVITY_KEY, encode_document(&activity)?).await?;
        }
        let _ = self.activity_tx.send(ActivityChange::Appended(entry.clone()));
        Ok(())
    }

    async fn list_recent_activity(&self, limit: usize) -> Result<Vec<ActivityItem>, StoreError> {
        let mut activity = self.read_activity().await?;
        activity.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        activity.truncate(limit);
        Ok(activity)
    }

    fn subscribe_activity(&self) -> broadcast::Receiver<ActivityChange> {
        self.activity_tx.subscribe()
    }

    async fn clear_all_activity(&self) -> Result<ClearOutcome, StoreError> {
        let deleted = {
            let _guard = self.io_lock.lock().await;
            let deleted = self.read_activity().await?.len();
            self.write_blob(ACTIVITY_KEY, "[]".to_string()).await?;
            deleted
        };
        let _ = self.activity_tx.send(ActivityChange::Cleared);
        Ok(ClearOutcome {
            deleted,
            remaining: 0,
        })
    }
}
