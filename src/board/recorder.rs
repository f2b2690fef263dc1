//! Turns domain events into activity-feed entries.

use super::cache::{SaveHandle, SyncCache};
use super::models::{ActivityItem, TaskStatus};

/// Number of activity entries retained, newest first.
pub const ACTIVITY_LIMIT: usize = 50;

/// Something worth an entry in the activity feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    TaskCreated {
        title: String,
    },
    TaskMoved {
        title: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    TaskDeleted {
        title: String,
    },
    TaskUpdated {
        title: String,
        fields: Vec<String>,
    },
    /// A deployment status change reported by the deploy webhook.
    Deployment {
        label: String,
        project: String,
        details: String,
    },
    /// A pull request event reported by the GitHub webhook.
    PullRequest {
        action: String,
        title: String,
        details: String,
    },
}

impl ActivityEvent {
    pub fn into_item(self) -> ActivityItem {
        match self {
            Self::TaskCreated { title } => ActivityItem::new("Created", title, None),
            Self::TaskMoved { title, from, to } => ActivityItem::new(
                "Moved",
                title,
                Some(format!("{} -> {}", from.title(), to.title())),
            ),
            Self::TaskDeleted { title } => ActivityItem::new("Deleted", title, None),
            Self::TaskUpdated { title, fields } => {
                let details = (!fields.is_empty()).then(|| fields.join(", "));
                ActivityItem::new("Updated", title, details)
            }
            Self::Deployment {
                label,
                project,
                details,
            } => ActivityItem::new(
                format!("Deployment {}", label),
                format!("Deploy: {}", project),
                Some(details),
            )
            .with_source("deploy-webhook"),
            Self::PullRequest {
                action,
                title,
                details,
            } => ActivityItem::new(action, title, Some(details)).with_source("github-webhook"),
        }
    }
}

/// Fire-and-forget front door to the activity feed.
#[derive(Clone)]
pub struct ActivityRecorder {
    cache: SyncCache,
}

impl ActivityRecorder {
    pub fn new(cache: SyncCache) -> Self {
        Self { cache }
    }

    /// Record a free-form entry. The returned handle resolves once the
    /// remote append settled; failures there are logged, never returned.
    pub fn record(
        &self,
        action: impl Into<String>,
        subject_title: impl Into<String>,
        details: Option<String>,
    ) -> SaveHandle {
        self.cache
            .record_activity(ActivityItem::new(action, subject_title, details))
    }

    pub fn record_event(&self, event: ActivityEvent) -> SaveHandle {
        let item = event.into_item();
        tracing::debug!(action = %item.action, task = %item.task_title, "recording activity");
        self.cache.record_activity(item)
    }

    pub fn clear(&self) -> SaveHandle {
        self.cache.clear_activity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::cache::CacheOptions;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_moved_details_use_column_titles() {
        let item = ActivityEvent::TaskMoved {
            title: "Write spec".into(),
            from: TaskStatus::Backlog,
            to: TaskStatus::InProgress,
        }
        .into_item();
        assert_eq!(item.action, "Moved");
        assert_eq!(item.details.as_deref(), Some("Backlog -> In Progress"));
        assert!(item.source.is_none());
    }

    #[test]
    fn test_updated_lists_changed_fields() {
        let item = ActivityEvent::TaskUpdated {
            title: "t".into(),
            fields: vec!["title".into(), "priority".into()],
        }
        .into_item();
        assert_eq!(item.details.as_deref(), Some("title, priority"));
    }

    #[test]
    fn test_deployment_entry_shape() {
        let item = ActivityEvent::Deployment {
            label: "Deployed".into(),
            project: "Dashboard".into(),
            details: "Dashboard -> READY".into(),
        }
        .into_item();
        assert_eq!(item.action, "Deployment Deployed");
        assert_eq!(item.task_title, "Deploy: Dashboard");
        assert_eq!(item.source.as_deref(), Some("deploy-webhook"));
    }

    #[tokio::test]
    async fn test_record_reaches_feed_and_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = SyncCache::new(store.clone(), CacheOptions::default());
        cache.initialize().await.unwrap();
        let recorder = ActivityRecorder::new(cache.clone());

        recorder
            .record("Created", "Write spec", None)
            .wait()
            .await
            .unwrap();
        assert_eq!(cache.activity()[0].task_title, "Write spec");
        assert_eq!(store.stored_activity().len(), 1);

        recorder.clear().wait().await.unwrap();
        assert!(cache.activity().is_empty());
        assert!(store.stored_activity().is_empty());
    }
}
