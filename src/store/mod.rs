//! Remote store adapters.
//!
//! The board lives remotely as one document holding the whole task
//! collection, plus an append-only collection of activity entries. Every
//! backend implements [`RemoteStore`]:
//!
//! | Backend       | Use                                                   |
//! |---------------|-------------------------------------------------------|
//! | `SqliteStore` | durable document store (default)                      |
//! | `LocalStore`  | degraded/offline fallback: two whole-JSON blobs       |
//! | `MemoryStore` | ephemeral runs and tests, with fault injection        |
//!
//! Live subscriptions are tokio broadcast receivers; dropping the receiver
//! unsubscribes. Subscribers see every change, including the echo of their
//! own writes.

pub mod local;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::board::models::{ActivityItem, BoardDocument};
use crate::config::{StoreBackend, StoreConfig};
use crate::errors::StoreError;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Capacity of the live-update broadcast channels.
pub(crate) const SUBSCRIPTION_CAPACITY: usize = 64;

/// A change pushed on the activity subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ActivityChange {
    Appended(ActivityItem),
    Cleared,
}

/// Result of a bulk activity delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    pub deleted: usize,
    pub remaining: usize,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short backend name used in log fields.
    fn name(&self) -> &'static str;

    /// Point read of the board document. `None` means it does not exist yet.
    async fn read_board(&self) -> Result<Option<BoardDocument>, StoreError>;

    /// Full-document overwrite (last write wins).
    async fn write_board(&self, doc: &BoardDocument) -> Result<(), StoreError>;

    fn subscribe_board(&self) -> broadcast::Receiver<BoardDocument>;

    async fn append_activity(&self, entry: &ActivityItem) -> Result<(), StoreError>;

    /// Most recent entries, newest first, at most `limit`.
    async fn list_recent_activity(&self, limit: usize) -> Result<Vec<ActivityItem>, StoreError>;

    fn subscribe_activity(&self) -> broadcast::Receiver<ActivityChange>;

    /// Delete every stored activity entry. Entries deleted before a failure
    /// stay deleted.
    async fn clear_all_activity(&self) -> Result<ClearOutcome, StoreError>;
}

/// Open the backend named by the configuration.
pub fn open(config: &StoreConfig) -> anyhow::Result<Arc<dyn RemoteStore>> {
    let store: Arc<dyn RemoteStore> = match config.backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.path)?),
        StoreBackend::Local => Arc::new(LocalStore::new(config.path.clone())),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    tracing::debug!(store = store.name(), path = %config.path.display(), "store opened");
    Ok(store)
}

/// Serialize a payload for storage with every `null` removed.
///
/// Stores reject explicit absent-markers as field values, so "no value" is
/// always encoded as "field not present".
pub fn encode_document<T: Serialize>(value: &T) -> Result<String, StoreError> {
    let mut json = serde_json::to_value(value)?;
    strip_absent(&mut json);
    Ok(serde_json::to_string(&json)?)
}

/// Recursively drop `null` members from objects. Nulls inside arrays are
/// dropped too, since an array slot cannot be "not present".
pub fn strip_absent(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                strip_absent(v);
            }
        }
        Value::Array(items) => {
            items.retain(|v| !v.is_null());
            for v in items.iter_mut() {
                strip_absent(v);
            }
        }
        _ => {}
    }
}
