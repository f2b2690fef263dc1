use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::broadcast;

use super::{ActivityChange, ClearOutcome, RemoteStore, SUBSCRIPTION_CAPACITY, encode_document};
use crate::board::models::{ActivityItem, BoardDocument};
use crate::errors::StoreError;

/// Key of the single document holding the whole task collection.
const BOARD_KEY: &str = "board/tasks";

/// Rows removed per statement during a bulk activity clear.
const CLEAR_BATCH: usize = 100;

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(anyhow::Error::from(e))
}

/// Async-safe handle to the board database.
///
/// Wraps the SQLite connection behind `Arc<Mutex>` and runs all access on
/// tokio's blocking thread pool via `spawn_blocking`, keeping synchronous
/// SQLite I/O off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Connection>>,
}

impl DbHandle {
    pub fn new(conn: Connection) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(conn)),
        }
    }

    /// Run a closure with access to the connection on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Database(anyhow::Error::from(e).context("DB task panicked")))?
    }
}

/// Document store persisted in SQLite.
///
/// One `documents` row per document key and an append-only `activity`
/// table whose `seq` column is the store-assigned ordering. Live updates are
/// pushed to subscribers of this instance.
pub struct SqliteStore {
    db: DbHandle,
    board_tx: broadcast::Sender<BoardDocument>,
    activity_tx: broadcast::Sender<ActivityChange>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path and run migrations.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        run_migrations(&conn).context("Failed to run migrations")?;
        let (board_tx, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        let (activity_tx, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Ok(Self {
            db: DbHandle::new(conn),
            board_tx,
            activity_tx,
        })
    }
}

fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            key TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS activity (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            body TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_activity_timestamp ON activity(timestamp);
        ",
    )
}

#[async_trait]
impl RemoteStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn read_board(&self) -> Result<Option<BoardDocument>, StoreError> {
        let body: Option<String> = self
            .db
            .call(|conn| {
                conn.query_row(
                    "SELECT body FROM documents WHERE key = ?1",
                    params![BOARD_KEY],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)
            })
            .await?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn write_board(&self, doc: &BoardDocument) -> Result<(), StoreError> {
        let body = encode_document(doc)?;
        let updated_at = doc.updated_at.to_rfc3339();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO documents (key, body, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                    params![BOARD_KEY, body, updated_at],
                )
                .map_err(db_err)?;
                Ok(())
            })
            .await?;
        let _ = self.board_tx.send(doc.clone());
        Ok(())
    }

    fn subscribe_board(&self) -> broadcast::Receiver<BoardDocument> {
        self.board_tx.subscribe()
    }

    async fn append_activity(&self, entry: &ActivityItem) -> Result<(), StoreError> {
        let body = encode_document(entry)?;
        let id = entry.id.clone();
        let timestamp = entry
            .timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO activity (id, body, timestamp) VALUES (?1, ?2, ?3)",
                    params![id, body, timestamp],
                )
                .map_err(db_err)?;
                Ok(())
            })
            .await?;
        let _ = self.activity_tx.send(ActivityChange::Appended(entry.clone()));
        Ok(())
    }

    async fn list_recent_activity(&self, limit: usize) -> Result<Vec<ActivityItem>, StoreError> {
        let bodies: Vec<String> = self
            .db
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT body FROM activity ORDER BY timestamp DESC, seq DESC LIMIT ?1",
                    )
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map(params![limit as i64], |row| row.get::<_, String>(0))
                    .map_err(db_err)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
            })
            .await?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }

    fn subscribe_activity(&self) -> broadcast::Receiver<ActivityChange> {
        self.activity_tx.subscribe()
    }

    async fn clear_all_activity(&self) -> Result<ClearOutcome, StoreError> {
        let outcome = self
            .db
            .call(|conn| {
                let mut deleted = 0usize;
                loop {
                    // Each batch commits on its own; a failing batch stops the
                    // clear and leaves earlier deletions in place.
                    match conn.execute(
                        "DELETE FROM activity WHERE seq IN
                         (SELECT seq FROM activity ORDER BY seq LIMIT ?1)",
                        params![CLEAR_BATCH as i64],
                    ) {
                        Ok(0) => break,
                        Ok(removed) => deleted += removed,
                        Err(e) => {
                            tracing::warn!(deleted, error = %e, "activity clear batch failed");
                            break;
                        }
                    }
                }
                let remaining: i64 = conn
                    .query_row("SELECT COUNT(*) FROM activity", [], |row| row.get(0))
                    .map_err(db_err)?;
                Ok(ClearOutcome {
                    deleted,
                    remaining: remaining as usize,
                })
            })
            .await?;
        let _ = self.activity_tx.send(ActivityChange::Cleared);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{NewTask, Task};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_failing_clear_batch_reports_remainder() {
        let store = store();
        for i in 0..CLEAR_BATCH + 5 {
            store
                .append_activity(&ActivityItem::new("Created", format!("t{}", i), None))
                .await
                .unwrap();
        }
        let limit = CLEAR_BATCH as i64;
        store
            .db
            .call(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE TRIGGER keep_tail BEFORE DELETE ON activity
                     WHEN OLD.seq > {limit}
                     BEGIN SELECT RAISE(ABORT, 'locked'); END;"
                ))
                .map_err(db_err)
            })
            .await
            .unwrap();

        let outcome = store.clear_all_activity().await.unwrap();
        assert_eq!(outcome.deleted, CLEAR_BATCH);
        assert_eq!(outcome.remaining, 5);
        assert_eq!(store.list_recent_activity(50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_read_board_missing_returns_none() {
        assert!(store().read_board().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read_board() {
        let store = store();
        let doc = BoardDocument::new(vec![Task::new(NewTask::titled("Write spec"))], 4, Some("c1".into()));
        store.write_board(&doc).await.unwrap();

        let read = store.read_board().await.unwrap().unwrap();
        assert_eq!(read, doc);
    }

    #[tokio::test]
    async fn test_write_board_overwrites_previous_document() {
        let store = store();
        store
            .write_board(&BoardDocument::new(vec![Task::new(NewTask::titled("old"))], 1, None))
            .await
            .unwrap();
        store.write_board(&BoardDocument::new(vec![], 2, None)).await.unwrap();
        let read = store.read_board().await.unwrap().unwrap();
        assert!(read.tasks.is_empty());
        assert_eq!(read.revision, 2);
    }

    #[tokio::test]
    async fn test_stored_body_has_no_nulls() {
        let store = store();
        store
            .write_board(&BoardDocument::new(vec![Task::new(NewTask::titled("t"))], 1, None))
            .await
            .unwrap();
        let body: String = store
            .db
            .call(|conn| {
                conn.query_row("SELECT body FROM documents", [], |row| row.get(0))
                    .map_err(db_err)
            })
            .await
            .unwrap();
        assert!(!body.contains("null"));
        assert!(!body.contains("origin"));
    }

    #[tokio::test]
    async fn test_activity_append_list_and_clear() {
        let store = store();
        let mut rx = store.subscribe_activity();
        for i in 0..3 {
            let mut item = ActivityItem::new("Created", format!("t{}", i), None);
            item.timestamp = chrono::Utc::now() + chrono::Duration::seconds(i);
            store.append_activity(&item).await.unwrap();
        }
        assert!(matches!(rx.recv().await.unwrap(), ActivityChange::Appended(_)));

        let items = store.list_recent_activity(2).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].task_title, "t2");

        let outcome = store.clear_all_activity().await.unwrap();
        assert_eq!(outcome, ClearOutcome { deleted: 3, remaining: 0 });
        assert!(store.list_recent_activity(50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_activity_id_is_ignored() {
        let store = store();
        let item = ActivityItem::new("Created", "t", None);
        store.append_activity(&item).await.unwrap();
        store.append_activity(&item).await.unwrap();
        assert_eq!(store.list_recent_activity(50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/board.db");
        let store = SqliteStore::open(&path).unwrap();
        store.write_board(&BoardDocument::new(vec![], 1, None)).await.unwrap();
        assert!(path.exists());
    }
}
