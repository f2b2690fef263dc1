use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    Revision,
    Review,
    Done,
}

impl TaskStatus {
    /// Board columns in display order.
    pub const ALL: [TaskStatus; 5] = [
        Self::Backlog,
        Self::InProgress,
        Self::Revision,
        Self::Review,
        Self::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in-progress",
            Self::Revision => "revision",
            Self::Review => "review",
            Self::Done => "done",
        }
    }

    /// Column title shown on the board and used in "Moved" activity details.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Backlog => "Backlog",
            Self::InProgress => "In Progress",
            Self::Revision => "Revision",
            Self::Review => "Review",
            Self::Done => "Done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(Self::Backlog),
            "in-progress" => Ok(Self::InProgress),
            "revision" => Ok(Self::Revision),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// One recorded field change on a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
}

impl Task {
    /// Build a new task with a fresh id and matching created/updated stamps.
    pub fn new(new_task: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: new_task.title.trim().to_string(),
            description: new_task.description.filter(|d| !d.trim().is_empty()),
            status: new_task.status,
            priority: new_task.priority,
            created_at: now,
            updated_at: now,
            tags: new_task.tags.map(dedup_tags).filter(|t| !t.is_empty()),
            link: new_task.link.filter(|l| !l.trim().is_empty()),
            history: None,
        }
    }

    /// Move `updated_at` forward, never behind `created_at`.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now.max(self.created_at);
    }

    pub fn push_history(&mut self, field: &str, old: Option<String>, new: Option<String>) {
        self.history.get_or_insert_with(Vec::new).push(HistoryEntry {
            timestamp: Utc::now(),
            field: field.to_string(),
            old_value: old,
            new_value: new,
        });
    }
}

/// Tags are an ordered set: first occurrence wins.
pub fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Input for creating a task. Defaults: backlog, medium priority, no tags.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub link: Option<String>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Backlog
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: TaskStatus::Backlog,
            priority: Priority::Medium,
            tags: None,
            link: None,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// Partial edit of a task. `Some("")` on an optional text field clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: String,
    pub action: String,
    pub task_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ActivityItem {
    pub fn new(action: impl Into<String>, task_title: impl Into<String>, details: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.into(),
            task_title: task_title.into(),
            details,
            timestamp: Utc::now(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

/// The remote wire shape of the board: one document holding every task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BoardDocument {
    pub tasks: Vec<Task>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl BoardDocument {
    pub fn new(tasks: Vec<Task>, revision: u64, origin: Option<String>) -> Self {
        Self {
            tasks,
            updated_at: Utc::now(),
            revision,
            origin,
        }
    }
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnView {
    pub id: TaskStatus,
    pub title: String,
    pub tasks: Vec<Task>,
}

/// Partition an ordered task collection into board columns, keeping order.
pub fn partition_columns(tasks: &[Task]) -> Vec<ColumnView> {
    TaskStatus::ALL
        .iter()
        .map(|status| ColumnView {
            id: *status,
            title: status.title().to_string(),
            tasks: tasks.iter().filter(|t| t.status == *status).cloned().collect(),
        })
        .collect()
}

/// Tasks seeded into a brand-new board when `seed_on_first_run` is set.
pub fn starter_tasks() -> Vec<Task> {
    fn starter(
        title: &str,
        description: &str,
        status: TaskStatus,
        priority: Priority,
        tags: &[&str],
    ) -> Task {
        Task::new(NewTask {
            title: title.to_string(),
            description: Some(description.to_string()),
            status,
            priority,
            tags: Some(tags.iter().map(|t| t.to_string()).collect()),
            link: None,
        })
    }
    vec![
        starter(
            "Set up the task board",
            "Configure the store backend and webhook secrets",
            TaskStatus::Done,
            Priority::High,
            &["setup"],
        ),
        starter(
            "Connect repository webhooks",
            "Point pull request events at /api/webhooks/github",
            TaskStatus::InProgress,
            Priority::High,
            &["github", "setup"],
        ),
        starter(
            "Connect deploy notifications",
            "Point deployment events at /api/webhooks/deploy",
            TaskStatus::Backlog,
            Priority::Medium,
            &["deploy"],
        ),
    ]
}
