//! Board core: models, the synchronization cache and everything built on it.

pub mod cache;
pub mod models;
pub mod observer;
pub mod recorder;
pub mod retry;
pub mod view_model;

pub use cache::{CacheOptions, SaveFailure, SaveHandle, SyncCache, SyncState};
pub use models::{ActivityItem, BoardDocument, NewTask, Task, TaskPatch, TaskStatus, starter_tasks};
pub use recorder::{ACTIVITY_LIMIT, ActivityEvent, ActivityRecorder};
pub use retry::RetryPolicy;
pub use view_model::{BoardViewModel, DropTarget};
