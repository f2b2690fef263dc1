use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{ActivityChange, ClearOutcome, RemoteStore, SUBSCRIPTION_CAPACITY, encode_document};
use crate::board::models::{ActivityItem, BoardDocument};
use crate::errors::StoreError;

/// In-process document store.
///
/// Round-trips every write through [`encode_document`] so the stored shape
/// matches what a real backend would persist. Failure budgets let tests make
/// the next N calls of an operation fail.
pub struct MemoryStore {
    board: Mutex<Option<BoardDocument>>,
    /// Newest first.
    activity: Mutex<Vec<ActivityItem>>,
    board_tx: broadcast::Sender<BoardDocument>,
    activity_tx: broadcast::Sender<ActivityChange>,
    board_writes: AtomicUsize,
    activity_appends: AtomicUsize,
    fail_reads: AtomicUsize,
    fail_board_writes: AtomicUsize,
    fail_appends: AtomicUsize,
    /// Clear deletes this many entries, then fails.
    fail_clear_after: Mutex<Option<usize>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (board_tx, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        let (activity_tx, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Self {
            board: Mutex::new(None),
            activity: Mutex::new(Vec::new()),
            board_tx,
            activity_tx,
            board_writes: AtomicUsize::new(0),
            activity_appends: AtomicUsize::new(0),
            fail_reads: AtomicUsize::new(0),
            fail_board_writes: AtomicUsize::new(0),
            fail_appends: AtomicUsize::new(0),
            fail_clear_after: Mutex::new(None),
        }
    }

    /// Start with an existing board document.
    pub fn with_board(doc: BoardDocument) -> Self {
        let store = Self::new();
        *store.board.lock() = Some(doc);
        store
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_board_writes(&self, n: usize) {
        self.fail_board_writes.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_appends(&self, n: usize) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    pub fn fail_clear_after(&self, deleted: usize) {
        *self.fail_clear_after.lock() = Some(deleted);
    }

    /// Number of `write_board` calls, failed ones included.
    pub fn board_write_calls(&self) -> usize {
        self.board_writes.load(Ordering::SeqCst)
    }

    /// Number of `append_activity` calls, failed ones included.
    pub fn append_calls(&self) -> usize {
        self.activity_appends.load(Ordering::SeqCst)
    }

    pub fn stored_board(&self) -> Option<BoardDocument> {
        self.board.lock().clone()
    }

    pub fn stored_activity(&self) -> Vec<ActivityItem> {
        self.activity.lock().clone()
    }

    /// Simulate a write by another client: store and push to subscribers.
    pub fn push_remote_board(&self, doc: BoardDocument) {
        *self.board.lock() = Some(doc.clone());
        let _ = self.board_tx.send(doc);
    }

    fn take_failure(budget: &AtomicUsize) -> bool {
        budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read_board(&self) -> Result<Option<BoardDocument>, StoreError> {
        if Self::take_failure(&self.fail_reads) {
            return Err(StoreError::NotReachable {
                store: "memory".into(),
                message: "read_board".into(),
            });
        }
        Ok(self.board.lock().clone())
    }

    async fn write_board(&self, doc: &BoardDocument) -> Result<(), StoreError> {
        self.board_writes.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_board_writes) {
            return Err(StoreError::Injected("write_board".into()));
        }
        let stored: BoardDocument = serde_json::from_str(&encode_document(doc)?)?;
        *self.board.lock() = Some(stored.clone());
        let _ = self.board_tx.send(stored);
        Ok(())
    }

    fn subscribe_board(&self) -> broadcast::Receiver<BoardDocument> {
        self.board_tx.subscribe()
    }

    async fn append_activity(&self, entry: &ActivityItem) -> Result<(), StoreError> {
        self.activity_appends.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_appends) {
            return Err(StoreError::Injected("append_activity".into()));
        }
        let stored: ActivityItem = serde_json::from_str(&encode_document(entry)?)?;
        self.activity.lock().insert(0, stored.clone());
        let _ = self.activity_tx.send(ActivityChange::Appended(stored));
        Ok(())
    }

    async fn list_recent_activity(&self, limit: usize) -> Result<Vec<ActivityItem>, StoreError> {
        if Self::take_failure(&self.fail_reads) {
            return Err(StoreError::NotReachable {
                store: "memory".into(),
                message: "list_recent_activity".into(),
            });
        }
        let mut items = self.activity.lock().clone();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items.truncate(limit);
        Ok(items)
    }

    fn subscribe_activity(&self) -> broadcast::Receiver<ActivityChange> {
        self.activity_tx.subscribe()
    }

    async fn clear_all_activity(&self) -> Result<ClearOutcome, StoreError> {
        let fail_after = self.fail_clear_after.lock().take();
        let mut activity = self.activity.lock();
        match fail_after {
            Some(n) if n < activity.len() => {
                // Oldest entries go first, like a batched delete over an
                // append-ordered collection.
                let keep = activity.len() - n;
                activity.truncate(keep);
                Err(StoreError::Injected(format!(
                    "clear_all_activity after {} deletions",
                    n
                )))
            }
            _ => {
                let deleted = activity.len();
                activity.clear();
                drop(activity);
                let _ = self.activity_tx.send(ActivityChange::Cleared);
                Ok(ClearOutcome {
                    deleted,
                    remaining: 0,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{NewTask, Task};

    #[tokio::test]
    async fn test_read_missing_board_is_none() {
        let store = MemoryStore::new();
        assert!(store.read_board().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_echoes_to_subscribers() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe_board();
        let doc = BoardDocument::new(vec![Task::new(NewTask::titled("a"))], 1, None);
        store.write_board(&doc).await.unwrap();
        let echoed = rx.recv().await.unwrap();
        assert_eq!(echoed.revision, 1);
        assert_eq!(echoed.tasks[0].title, "a");
        assert_eq!(store.board_write_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_budget_counts_down() {
        let store = MemoryStore::new();
        store.fail_next_board_writes(2);
        let doc = BoardDocument::new(vec![], 1, None);
        assert!(store.write_board(&doc).await.is_err());
        assert!(store.write_board(&doc).await.is_err());
        assert!(store.write_board(&doc).await.is_ok());
        assert_eq!(store.board_write_calls(), 3);
    }

    #[tokio::test]
    async fn test_list_recent_activity_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut item = ActivityItem::new("Created", format!("t{}", i), None);
            item.timestamp = chrono::Utc::now() + chrono::Duration::seconds(i);
            store.append_activity(&item).await.unwrap();
        }
        let items = store.list_recent_activity(3).await.unwrap();
        let titles: Vec<_> = items.iter().map(|i| i.task_title.as_str()).collect();
        assert_eq!(titles, vec!["t4", "t3", "t2"]);
    }

    #[tokio::test]
    async fn test_partial_clear_keeps_deleted_entries_deleted() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store
                .append_activity(&ActivityItem::new("Created", format!("t{}", i), None))
                .await
                .unwrap();
        }
        store.fail_clear_after(3);
        assert!(store.clear_all_activity().await.is_err());
        assert_eq!(store.stored_activity().len(), 1);

        let outcome = store.clear_all_activity().await.unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(store.stored_activity().is_empty());
    }
}
