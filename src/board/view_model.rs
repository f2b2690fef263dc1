//! Board view model: task intents and drag gestures on top of the cache.
//!
//! A drag gesture is `drag_start` → any number of `drag_over` (preview
//! only) → `drag_end` or `drag_cancel`. Nothing reaches the cache until
//! `drag_end`, which commits the status change and the reorder as one
//! mutation.

use parking_lot::Mutex;
use serde::Deserialize;

use super::cache::SyncCache;
use super::models::{ColumnView, NewTask, Task, TaskPatch, TaskStatus, dedup_tags, partition_columns};
use super::recorder::{ActivityEvent, ActivityRecorder};
use crate::errors::BoardError;

/// Where a dragged task is dropped: onto a column, or onto another task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropTarget {
    Column(TaskStatus),
    Task(String),
}

#[derive(Debug, Clone)]
struct DragState {
    task_id: String,
    over: Option<DropTarget>,
}

/// A committed drop: the moved task and, when the column changed, the
/// columns it moved between.
struct DropOutcome {
    task: Task,
    column_change: Option<(TaskStatus, TaskStatus)>,
}

pub struct BoardViewModel {
    cache: SyncCache,
    recorder: ActivityRecorder,
    drag: Mutex<Option<DragState>>,
}

impl BoardViewModel {
    pub fn new(cache: SyncCache) -> Self {
        let recorder = ActivityRecorder::new(cache.clone());
        Self {
            cache,
            recorder,
            drag: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &SyncCache {
        &self.cache
    }

    pub fn recorder(&self) -> &ActivityRecorder {
        &self.recorder
    }

    /// Tasks partitioned into columns, with an in-progress drag previewed.
    pub fn columns(&self) -> Vec<ColumnView> {
        let mut tasks = self.cache.tasks();
        if let Some(DragState {
            task_id,
            over: Some(target),
        }) = self.drag.lock().clone()
        {
            // A preview that no longer applies just renders the board as is.
            let _ = apply_drop(&mut tasks, &task_id, &target);
        }
        partition_columns(&tasks)
    }

    // ── Task intents ─────────────────────────────────────────────────

    pub fn create_task(&self, new_task: NewTask) -> Result<Task, BoardError> {
        if new_task.title.trim().is_empty() {
            return Err(BoardError::EmptyTitle);
        }
        let task = Task::new(new_task);
        let created = task.clone();
        let (_, save) = self.cache.try_update_tasks(move |tasks| {
            tasks.insert(0, task);
            Ok::<_, BoardError>(())
        })?;
        drop(save);
        tracing::info!(task_id = %created.id, status = %created.status, "task created");
        let _ = self.recorder.record_event(ActivityEvent::TaskCreated {
            title: created.title.clone(),
        });
        Ok(created)
    }

    /// Apply a partial edit. Every changed field gets a history entry; an
    /// edit that changes nothing is not written and not recorded.
    pub fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task, BoardError> {
        let ((task, fields), save) = self.cache.try_update_tasks(|tasks| {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| BoardError::TaskNotFound { id: id.to_string() })?;
            let fields = apply_patch(task, patch)?;
            if !fields.is_empty() {
                task.touch();
            }
            Ok::<_, BoardError>((task.clone(), fields))
        })?;
        drop(save);
        if !fields.is_empty() {
            tracing::info!(task_id = %task.id, fields = ?fields, "task updated");
            let _ = self.recorder.record_event(ActivityEvent::TaskUpdated {
                title: task.title.clone(),
                fields,
            });
        }
        Ok(task)
    }

    pub fn delete_task(&self, id: &str) -> Result<Task, BoardError> {
        let (removed, save) = self.cache.try_update_tasks(|tasks| {
            let idx = tasks
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| BoardError::TaskNotFound { id: id.to_string() })?;
            Ok::<_, BoardError>(tasks.remove(idx))
        })?;
        drop(save);
        tracing::info!(task_id = %removed.id, "task deleted");
        let _ = self.recorder.record_event(ActivityEvent::TaskDeleted {
            title: removed.title.clone(),
        });
        Ok(removed)
    }

    // ── Drag gestures ────────────────────────────────────────────────

    pub fn drag_start(&self, id: &str) -> Result<(), BoardError> {
        if self.cache.task(id).is_none() {
            return Err(BoardError::TaskNotFound { id: id.to_string() });
        }
        *self.drag.lock() = Some(DragState {
            task_id: id.to_string(),
            over: None,
        });
        Ok(())
    }

    /// Update the preview only. Nothing is written.
    pub fn drag_over(&self, target: DropTarget) -> Result<(), BoardError> {
        let mut drag = self.drag.lock();
        let state = drag.as_mut().ok_or(BoardError::NoActiveDrag)?;
        state.over = Some(target);
        Ok(())
    }

    /// Finish the gesture. `None` (dropped outside any target) cancels.
    pub fn drag_end(&self, target: Option<DropTarget>) -> Result<Option<Task>, BoardError> {
        let state = self.drag.lock().take().ok_or(BoardError::NoActiveDrag)?;
        match target {
            Some(target) => self.move_task(&state.task_id, target).map(Some),
            None => Ok(None),
        }
    }

    pub fn drag_cancel(&self) {
        self.drag.lock().take();
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.lock().is_some()
    }

    /// One-shot move: at most one status change plus at most one reorder,
    /// committed as a single mutation. Only a column change is recorded.
    pub fn move_task(&self, id: &str, target: DropTarget) -> Result<Task, BoardError> {
        let (outcome, save) = self
            .cache
            .try_update_tasks(|tasks| apply_drop(tasks, id, &target))?;
        drop(save);
        if let Some((from, to)) = outcome.column_change {
            tracing::info!(task_id = %outcome.task.id, from = %from, to = %to, "task moved");
            let _ = self.recorder.record_event(ActivityEvent::TaskMoved {
                title: outcome.task.title.clone(),
                from,
                to,
            });
        }
        Ok(outcome.task)
    }
}

fn apply_drop(tasks: &mut Vec<Task>, id: &str, target: &DropTarget) -> Result<DropOutcome, BoardError> {
    let idx = tasks
        .iter()
        .position(|t| t.id == id)
        .ok_or_else(|| BoardError::TaskNotFound { id: id.to_string() })?;
    let from = tasks[idx].status;

    let to = match target {
        DropTarget::Column(status) => *status,
        DropTarget::Task(over_id) if over_id == id => {
            return Ok(DropOutcome {
                task: tasks[idx].clone(),
                column_change: None,
            });
        }
        DropTarget::Task(over_id) => {
            tasks
                .iter()
                .find(|t| &t.id == over_id)
                .ok_or_else(|| BoardError::TaskNotFound { id: over_id.clone() })?
                .status
        }
    };

    if matches!(target, DropTarget::Column(_)) && from == to {
        return Ok(DropOutcome {
            task: tasks[idx].clone(),
            column_change: None,
        });
    }

    let mut task = tasks.remove(idx);
    if from != to {
        task.status = to;
        task.touch();
    }

    let insert_at = match target {
        // Dropped on a column: end of that column.
        DropTarget::Column(_) => tasks
            .iter()
            .rposition(|t| t.status == to)
            .map(|p| p + 1)
            .unwrap_or(tasks.len()),
        DropTarget::Task(over_id) => {
            let p = tasks.iter().position(|t| &t.id == over_id).unwrap_or(tasks.len());
            // Moving down within a column lands after the task dropped on.
            if from == to && idx <= p { p + 1 } else { p }
        }
    };
    tasks.insert(insert_at, task.clone());

    Ok(DropOutcome {
        task,
        column_change: (from != to).then_some((from, to)),
    })
}

/// Apply `patch` to `task`, returning the names of the fields that changed.
fn apply_patch(task: &mut Task, patch: TaskPatch) -> Result<Vec<String>, BoardError> {
    let mut fields = Vec::new();

    if let Some(title) = patch.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(BoardError::EmptyTitle);
        }
        if title != task.title {
            let old = std::mem::replace(&mut task.title, title.clone());
            task.push_history("title", Some(old), Some(title));
            fields.push("title".to_string());
        }
    }

    if let Some(description) = patch.description {
        let next = Some(description).filter(|d| !d.trim().is_empty());
        if next != task.description {
            let old = std::mem::replace(&mut task.description, next.clone());
            task.push_history("description", old, next);
            fields.push("description".to_string());
        }
    }

    if let Some(status) = patch.status {
        if status != task.status {
            let old = std::mem::replace(&mut task.status, status);
            task.push_history("status", Some(old.to_string()), Some(status.to_string()));
            fields.push("status".to_string());
        }
    }

    if let Some(priority) = patch.priority {
        if priority != task.priority {
            let old = std::mem::replace(&mut task.priority, priority);
            task.push_history(
                "priority",
                Some(old.as_str().to_string()),
                Some(priority.as_str().to_string()),
            );
            fields.push("priority".to_string());
        }
    }

    if let Some(tags) = patch.tags {
        let next = Some(dedup_tags(tags)).filter(|t| !t.is_empty());
        if next != task.tags {
            let old = std::mem::replace(&mut task.tags, next.clone());
            task.push_history("tags", old.map(|t| t.join(", ")), next.map(|t| t.join(", ")));
            fields.push("tags".to_string());
        }
    }

    if let Some(link) = patch.link {
        let next = Some(link.trim().to_string()).filter(|l| !l.is_empty());
        if next != task.link {
            let old = std::mem::replace(&mut task.link, next.clone());
            task.push_history("link", old, next);
            fields.push("link".to_string());
        }
    }

    Ok(fields)
}
