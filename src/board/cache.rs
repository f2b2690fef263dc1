//! Synchronization cache: the single in-process source of truth for tasks
//! and activity.
//!
//! ## Write cycle
//!
//! ```text
//! Idle ──local mutation──> Dirty ──write issued──> Saving ──ok──> Idle
//!                                                     │
//!                                                     └─retries exhausted─> ErrorSignaled ──> Idle
//! ```
//!
//! Local mutations are applied to the mirror synchronously and observers
//! are notified before any I/O happens. The resulting document is queued to
//! a single writer task while the mirror lock is still held, so writes reach
//! the store in mutation order. A failed write is not replayed: the next
//! local edit is the next chance to persist.
//!
//! ## Self-echo suppression
//!
//! Every board write carries a revision number one above the highest
//! revision this cache has written or seen, plus this cache's client id as
//! its origin. A snapshot with our origin and a revision below our latest
//! write is an echo of a superseded write and is ignored. The echo of the
//! latest write is what the store now holds, so it is applied if a foreign
//! snapshot replaced the mirror in between. Snapshots from other origins
//! replace the whole task collection (document-level last write wins)
//! unless they are older than the last foreign revision seen. Two writers
//! may produce the same revision; origin keeps them apart.
//!
//! ## Shutdown
//!
//! [`SyncCache::shutdown`] stops the listeners, closes the writer queue and
//! waits for queued writes (including their retries) to finish.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::models::{ActivityItem, BoardDocument, Task};
use super::observer::{Observers, Subscription};
use super::recorder::ACTIVITY_LIMIT;
use super::retry::RetryPolicy;
use crate::errors::SyncError;
use crate::store::{ActivityChange, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Dirty,
    Saving,
    ErrorSignaled,
}

/// Payload of the "cannot currently save" notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveFailure {
    pub revision: u64,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub retry: RetryPolicy,
    /// Tasks written once when the remote board document does not exist.
    pub seed: Option<Vec<Task>>,
    /// Identifies this process in written documents. Random when `None`.
    pub client_id: Option<String>,
}

/// Handle to a background write. Await it to observe the outcome, or drop
/// it to let the write finish on its own.
#[must_use = "await the handle or drop it explicitly"]
pub struct SaveHandle {
    pending: Pending,
}

enum Pending {
    None,
    Queued(oneshot::Receiver<Result<(), SyncError>>),
    Spawned(JoinHandle<Result<(), SyncError>>),
}

impl SaveHandle {
    fn noop() -> Self {
        Self {
            pending: Pending::None,
        }
    }

    /// True when the mutation changed nothing and no write was issued.
    pub fn is_noop(&self) -> bool {
        matches!(self.pending, Pending::None)
    }

    pub async fn wait(self) -> Result<(), SyncError> {
        match self.pending {
            Pending::None => Ok(()),
            Pending::Queued(rx) => rx
                .await
                .map_err(|_| SyncError::WriteTaskFailed("board writer stopped".into()))?,
            Pending::Spawned(handle) => handle
                .await
                .map_err(|e| SyncError::WriteTaskFailed(e.to_string()))?,
        }
    }
}

struct WriteJob {
    doc: BoardDocument,
    done: oneshot::Sender<Result<(), SyncError>>,
}

struct Mirror {
    tasks: Vec<Task>,
    /// Newest first, at most `ACTIVITY_LIMIT`.
    activity: Vec<ActivityItem>,
    state: SyncState,
    initialized: bool,
    last_local_revision: u64,
    last_remote_revision: u64,
    writes_pending: usize,
    /// Set by `initialize`, taken by `shutdown`.
    writer: Option<mpsc::UnboundedSender<WriteJob>>,
}

struct CacheInner {
    store: Arc<dyn RemoteStore>,
    retry: RetryPolicy,
    client_id: String,
    seed: Option<Vec<Task>>,
    mirror: Mutex<Mirror>,
    task_observers: Observers<Vec<Task>>,
    activity_observers: Observers<Vec<ActivityItem>>,
    error_observers: Observers<SaveFailure>,
    state_observers: Observers<SyncState>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct SyncCache {
    inner: Arc<CacheInner>,
}

impl SyncCache {
    pub fn new(store: Arc<dyn RemoteStore>, options: CacheOptions) -> Self {
        let client_id = options
            .client_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            inner: Arc::new(CacheInner {
                store,
                retry: options.retry,
                client_id,
                seed: options.seed,
                mirror: Mutex::new(Mirror {
                    tasks: Vec::new(),
                    activity: Vec::new(),
                    state: SyncState::Idle,
                    initialized: false,
                    last_local_revision: 0,
                    last_remote_revision: 0,
                    writes_pending: 0,
                    writer: None,
                }),
                task_observers: Observers::new(),
                activity_observers: Observers::new(),
                error_observers: Observers::new(),
                state_observers: Observers::new(),
                listeners: Mutex::new(Vec::new()),
                writer_task: Mutex::new(None),
            }),
        }
    }

    /// Load the board and recent activity, then start following remote
    /// changes.
    ///
    /// A missing board document starts an empty board, or writes the seed
    /// tasks once when a seed was configured. A read failure is returned as
    /// [`SyncError::RemoteRead`] and leaves the cache uninitialized.
    pub async fn initialize(&self) -> Result<(), SyncError> {
        if self.is_initialized() {
            return Ok(());
        }
        let store = self.inner.store.clone();

        // Subscribe before reading so no change slips between the two.
        let board_rx = store.subscribe_board();
        let activity_rx = store.subscribe_activity();

        let remote = store.read_board().await.map_err(SyncError::RemoteRead)?;
        let activity = store
            .list_recent_activity(ACTIVITY_LIMIT)
            .await
            .map_err(SyncError::RemoteRead)?;

        let (tasks, remote_revision, seeded) = match remote {
            Some(doc) => (doc.tasks, doc.revision, None),
            None => match &self.inner.seed {
                Some(seed) => {
                    let doc = BoardDocument::new(seed.clone(), 1, Some(self.inner.client_id.clone()));
                    (seed.clone(), 0, Some(doc))
                }
                None => (Vec::new(), 0, None),
            },
        };

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        {
            let mut mirror = self.inner.mirror.lock();
            mirror.writer = Some(writer_tx);
            mirror.tasks = tasks.clone();
            mirror.activity = activity.clone();
            mirror.last_remote_revision = remote_revision;
            if seeded.is_some() {
                mirror.last_local_revision = 1;
            }
            mirror.initialized = true;
        }

        if let Some(doc) = seeded {
            tracing::info!(store = store.name(), tasks = doc.tasks.len(), "board not found, writing seed tasks");
            let result = self
                .inner
                .retry
                .run("seed_board", || store.write_board(&doc))
                .await;
            if let Err(e) = result {
                tracing::warn!(attempts = e.attempts, error = %e.last, "failed to write seed tasks");
            }
        }

        let weak = Arc::downgrade(&self.inner);
        *self.inner.writer_task.lock() = Some(tokio::spawn(run_writer(weak.clone(), writer_rx)));

        let mut listeners = self.inner.listeners.lock();
        listeners.push(spawn_board_listener(weak.clone(), board_rx));
        listeners.push(spawn_activity_listener(weak, activity_rx));
        drop(listeners);

        tracing::info!(
            store = store.name(),
            tasks = tasks.len(),
            activity = activity.len(),
            revision = remote_revision,
            "synchronization cache initialized"
        );
        self.inner.task_observers.notify(&tasks);
        self.inner.activity_observers.notify(&activity);
        Ok(())
    }

    /// Stop following remote changes and flush the write queue.
    ///
    /// Returns once every queued board write has finished or exhausted its
    /// retries. Later mutations fail with [`SyncError::WriteTaskFailed`].
    pub async fn shutdown(&self) {
        for handle in self.inner.listeners.lock().drain(..) {
            handle.abort();
        }
        // Dropping the sender lets the writer drain what is queued and exit.
        let pending = {
            let mut mirror = self.inner.mirror.lock();
            mirror.writer.take();
            mirror.writes_pending
        };
        let writer = self.inner.writer_task.lock().take();
        if let Some(writer) = writer {
            if pending > 0 {
                tracing::info!(pending, "flushing queued board writes");
            }
            if let Err(e) = writer.await {
                tracing::warn!(error = %e, "board writer ended abnormally");
            }
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn is_initialized(&self) -> bool {
        self.inner.mirror.lock().initialized
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.inner.mirror.lock().tasks.clone()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.inner
            .mirror
            .lock()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    pub fn activity(&self) -> Vec<ActivityItem> {
        self.inner.mirror.lock().activity.clone()
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.mirror.lock().state
    }

    /// Highest board revision written or seen by this cache.
    pub fn last_revision(&self) -> u64 {
        let mirror = self.inner.mirror.lock();
        mirror.last_local_revision.max(mirror.last_remote_revision)
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn on_tasks<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Vec<Task>) + Send + Sync + 'static,
    {
        self.inner.task_observers.subscribe(f)
    }

    pub fn on_activity<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Vec<ActivityItem>) + Send + Sync + 'static,
    {
        self.inner.activity_observers.subscribe(f)
    }

    pub fn on_error<F>(&self, f: F) -> Subscription
    where
        F: Fn(&SaveFailure) + Send + Sync + 'static,
    {
        self.inner.error_observers.subscribe(f)
    }

    pub fn on_state<F>(&self, f: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.inner.state_observers.subscribe(f)
    }

    // ── Task writes ──────────────────────────────────────────────────

    /// Apply `f` to a copy of the task collection and commit it if `f`
    /// succeeds and changed something. Observers fire before the write is
    /// issued.
    pub fn try_update_tasks<F, R, E>(&self, f: F) -> Result<(R, SaveHandle), E>
    where
        F: FnOnce(&mut Vec<Task>) -> Result<R, E>,
        E: From<SyncError>,
    {
        let (value, tasks, reply, dirtied) = {
            let mut mirror = self.inner.mirror.lock();
            if !mirror.initialized {
                return Err(SyncError::NotInitialized.into());
            }
            if mirror.writer.is_none() {
                return Err(SyncError::WriteTaskFailed("board writer stopped".into()).into());
            }
            let mut next = mirror.tasks.clone();
            let value = f(&mut next)?;
            if next == mirror.tasks {
                return Ok((value, SaveHandle::noop()));
            }
            let revision = mirror.last_local_revision.max(mirror.last_remote_revision) + 1;
            mirror.last_local_revision = revision;
            mirror.tasks = next;
            mirror.writes_pending += 1;
            let doc = BoardDocument::new(
                mirror.tasks.clone(),
                revision,
                Some(self.inner.client_id.clone()),
            );
            let dirtied = mirror.state != SyncState::Dirty;
            mirror.state = SyncState::Dirty;
            let (done, reply) = oneshot::channel();
            if let Some(writer) = &mirror.writer {
                // A dead writer drops `done`, which surfaces in `wait()`.
                let _ = writer.send(WriteJob { doc, done });
            }
            (value, mirror.tasks.clone(), reply, dirtied)
        };

        if dirtied {
            self.inner.state_observers.notify(&SyncState::Dirty);
        }
        self.inner.task_observers.notify(&tasks);
        Ok((
            value,
            SaveHandle {
                pending: Pending::Queued(reply),
            },
        ))
    }

    pub fn update_tasks<F>(&self, f: F) -> Result<SaveHandle, SyncError>
    where
        F: FnOnce(&mut Vec<Task>),
    {
        self.try_update_tasks(|tasks| {
            f(tasks);
            Ok::<_, SyncError>(())
        })
        .map(|((), handle)| handle)
    }

    // ── Remote reconciliation ────────────────────────────────────────

    /// Reconcile a pushed board snapshot. Returns true when the mirror
    /// changed and observers were notified.
    pub fn apply_remote_snapshot(&self, doc: BoardDocument) -> bool {
        let tasks = {
            let mut mirror = self.inner.mirror.lock();
            if !mirror.initialized {
                return false;
            }
            let own = doc.origin.as_deref() == Some(self.inner.client_id.as_str());
            if own {
                if doc.revision < mirror.last_local_revision {
                    tracing::trace!(
                        revision = doc.revision,
                        local = mirror.last_local_revision,
                        "ignoring echo of superseded write"
                    );
                    return false;
                }
            } else {
                if doc.revision < mirror.last_remote_revision {
                    tracing::trace!(
                        revision = doc.revision,
                        remote = mirror.last_remote_revision,
                        "ignoring stale board snapshot"
                    );
                    return false;
                }
                mirror.last_remote_revision = doc.revision;
            }
            if doc.tasks == mirror.tasks {
                return false;
            }
            mirror.tasks = doc.tasks;
            mirror.tasks.clone()
        };
        tracing::debug!(tasks = tasks.len(), "applied remote board snapshot");
        self.inner.task_observers.notify(&tasks);
        true
    }

    /// Visibility-regain refresh: one point read compared against the mirror
    /// by content. Returns true when a change notification was dispatched.
    ///
    /// The read is discarded when a local write was queued or in flight
    /// while it ran, or a pushed snapshot arrived meanwhile; either one is
    /// newer than what the read saw.
    pub async fn refresh(&self) -> Result<bool, SyncError> {
        let before = {
            let mirror = self.inner.mirror.lock();
            if !mirror.initialized {
                return Err(SyncError::NotInitialized);
            }
            (mirror.last_local_revision, mirror.last_remote_revision, mirror.writes_pending)
        };
        let remote = self
            .inner
            .store
            .read_board()
            .await
            .map_err(SyncError::RemoteRead)?;
        let Some(doc) = remote else {
            return Ok(false);
        };

        let tasks = {
            let mut mirror = self.inner.mirror.lock();
            let after = (mirror.last_local_revision, mirror.last_remote_revision, mirror.writes_pending);
            if before.2 > 0 || after != before {
                tracing::debug!("board changed during refresh, keeping mirror");
                return Ok(false);
            }
            mirror.last_remote_revision = mirror.last_remote_revision.max(doc.revision);
            if doc.tasks == mirror.tasks {
                return Ok(false);
            }
            mirror.tasks = doc.tasks;
            mirror.tasks.clone()
        };
        tracing::debug!(tasks = tasks.len(), "refresh picked up remote board changes");
        self.inner.task_observers.notify(&tasks);
        Ok(true)
    }

    // ── Activity ─────────────────────────────────────────────────────

    /// Insert an entry into the local feed and append it remotely in the
    /// background. Remote failures are logged and swallowed.
    pub fn record_activity(&self, item: ActivityItem) -> SaveHandle {
        let activity = {
            let mut mirror = self.inner.mirror.lock();
            if mirror.activity.iter().any(|a| a.id == item.id) {
                return SaveHandle::noop();
            }
            mirror.activity.insert(0, item.clone());
            mirror.activity.truncate(ACTIVITY_LIMIT);
            mirror.activity.clone()
        };
        self.inner.activity_observers.notify(&activity);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let store = inner.store.clone();
            let result = inner
                .retry
                .run("append_activity", || store.append_activity(&item))
                .await;
            if let Err(e) = result {
                tracing::warn!(
                    activity_id = %item.id,
                    attempts = e.attempts,
                    error = %e.last,
                    "dropping activity entry after failed append"
                );
            }
            Ok(())
        });
        SaveHandle {
            pending: Pending::Spawned(handle),
        }
    }

    /// Empty the local feed immediately and delete every stored entry in the
    /// background. A partial remote failure is logged; the remainder is left
    /// for a later clear.
    pub fn clear_activity(&self) -> SaveHandle {
        {
            let mut mirror = self.inner.mirror.lock();
            mirror.activity.clear();
        }
        self.inner.activity_observers.notify(&Vec::new());

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let store = inner.store.clone();
            match inner
                .retry
                .run("clear_all_activity", || store.clear_all_activity())
                .await
            {
                Ok(outcome) => {
                    tracing::info!(deleted = outcome.deleted, remaining = outcome.remaining, "activity cleared");
                }
                Err(e) => {
                    tracing::warn!(attempts = e.attempts, error = %e.last, "activity clear incomplete");
                }
            }
            Ok(())
        });
        SaveHandle {
            pending: Pending::Spawned(handle),
        }
    }

    /// Reconcile a pushed activity change. Returns true when the feed changed.
    pub fn apply_activity_change(&self, change: ActivityChange) -> bool {
        let activity = {
            let mut mirror = self.inner.mirror.lock();
            match change {
                ActivityChange::Appended(item) => {
                    if mirror.activity.iter().any(|a| a.id == item.id) {
                        return false;
                    }
                    let pos = mirror
                        .activity
                        .iter()
                        .position(|a| a.timestamp < item.timestamp)
                        .unwrap_or(mirror.activity.len());
                    if pos >= ACTIVITY_LIMIT {
                        return false;
                    }
                    mirror.activity.insert(pos, item);
                    mirror.activity.truncate(ACTIVITY_LIMIT);
                }
                ActivityChange::Cleared => {
                    if mirror.activity.is_empty() {
                        return false;
                    }
                    mirror.activity.clear();
                }
            }
            mirror.activity.clone()
        };
        self.inner.activity_observers.notify(&activity);
        true
    }
}

fn set_state(inner: &CacheInner, state: SyncState) {
    let changed = {
        let mut mirror = inner.mirror.lock();
        let changed = mirror.state != state;
        mirror.state = state;
        changed
    };
    if changed {
        inner.state_observers.notify(&state);
    }
}

async fn run_writer(weak: Weak<CacheInner>, mut rx: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = rx.recv().await {
        let Some(inner) = weak.upgrade() else { break };
        let result = save_board(&inner, job.doc).await;
        let _ = job.done.send(result);
    }
}

async fn save_board(inner: &CacheInner, doc: BoardDocument) -> Result<(), SyncError> {
    set_state(inner, SyncState::Saving);

    let store = inner.store.clone();
    let result = inner
        .retry
        .run("write_board", || store.write_board(&doc))
        .await;

    let remaining = {
        let mut mirror = inner.mirror.lock();
        mirror.writes_pending = mirror.writes_pending.saturating_sub(1);
        mirror.writes_pending
    };
    let settled = if remaining == 0 {
        SyncState::Idle
    } else {
        SyncState::Dirty
    };

    match result {
        Ok(()) => {
            tracing::debug!(revision = doc.revision, tasks = doc.tasks.len(), "board saved");
            set_state(inner, settled);
            Ok(())
        }
        Err(e) => {
            tracing::error!(
                revision = doc.revision,
                attempts = e.attempts,
                error = %e.last,
                "board save failed, local changes kept"
            );
            set_state(inner, SyncState::ErrorSignaled);
            inner.error_observers.notify(&SaveFailure {
                revision: doc.revision,
                attempts: e.attempts,
                message: e.last.to_string(),
            });
            set_state(inner, settled);
            Err(SyncError::RemoteWrite {
                attempts: e.attempts,
                source: e.last,
            })
        }
    }
}

fn spawn_board_listener(
    weak: Weak<CacheInner>,
    mut rx: broadcast::Receiver<BoardDocument>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(doc) => {
                    let Some(inner) = weak.upgrade() else { break };
                    SyncCache { inner }.apply_remote_snapshot(doc);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    let Some(inner) = weak.upgrade() else { break };
                    tracing::warn!(skipped, "board subscription lagged, refreshing");
                    if let Err(e) = (SyncCache { inner }).refresh().await {
                        tracing::warn!(error = %e, "refresh after lag failed");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_activity_listener(
    weak: Weak<CacheInner>,
    mut rx: broadcast::Receiver<ActivityChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    let Some(inner) = weak.upgrade() else { break };
                    SyncCache { inner }.apply_activity_change(change);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "activity subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
