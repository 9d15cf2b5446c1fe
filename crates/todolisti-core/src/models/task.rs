//! Task model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{double_option, ProjectId, TagId, TaskId, UserId, Versioned};
use crate::error::{Error, Result};
use crate::util::normalize_text_option;

/// Maximum title length in characters
pub const TASK_TITLE_MAX_LEN: usize = 500;
const RECURRENCE_MAX_LEN: usize = 255;

/// Task priority levels, stored and transmitted as 0-4
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskPriority {
    #[default]
    None,
    Low,
    Medium,
    High,
    Urgent,
}

impl From<TaskPriority> for u8 {
    fn from(priority: TaskPriority) -> Self {
        match priority {
            TaskPriority::None => 0,
            TaskPriority::Low => 1,
            TaskPriority::Medium => 2,
            TaskPriority::High => 3,
            TaskPriority::Urgent => 4,
        }
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            4 => Ok(Self::Urgent),
            other => Err(format!("task priority must be in 0..=4, got {other}")),
        }
    }
}

impl TaskPriority {
    /// Decode a stored priority column, falling back to `None` for unknown values
    pub(crate) fn from_db(value: i64) -> Self {
        u8::try_from(value)
            .ok()
            .and_then(|value| Self::try_from(value).ok())
            .unwrap_or_default()
    }
}

/// A task owned by exactly one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub user_id: UserId,
    pub project_id: Option<ProjectId>,
    /// Parent task for subtasks
    pub parent_id: Option<TaskId>,
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    /// Completion timestamp, `None` while open
    pub completed_at: Option<DateTime<Utc>>,
    /// Recurrence rule (`daily`, `weekly`, or an RRULE string)
    pub recurrence: Option<String>,
    pub sort_order: i64,
    /// Calendar event mirrored from this task, if any
    pub google_event_id: Option<String>,
    /// Free-form client metadata (JSON object)
    pub metadata: Option<serde_json::Value>,
    pub tag_ids: Vec<TagId>,
    /// Optimistic concurrency counter, bumped on every accepted mutation
    pub sync_version: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete tombstone
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a fresh task at version 1 from validated input
    #[must_use]
    pub fn from_new(id: TaskId, user_id: UserId, input: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            project_id: input.project_id,
            parent_id: input.parent_id,
            title: input.title.trim().to_string(),
            description: normalize_text_option(input.description),
            priority: input.priority.unwrap_or_default(),
            due_date: input.due_date,
            completed_at: input.completed_at,
            recurrence: normalize_text_option(input.recurrence),
            sort_order: input.sort_order.unwrap_or(0),
            google_event_id: None,
            metadata: input.metadata,
            tag_ids: dedup_tags(input.tag_ids),
            sync_version: 1,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether the task has been completed
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Whether the task is past due and still open
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match (self.due_date, self.completed_at) {
            (Some(due), None) => now > due,
            _ => false,
        }
    }

    /// Whether the task carries a soft-delete tombstone
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Versioned for Task {
    fn sync_version(&self) -> i64 {
        self.sync_version
    }
}

/// Input for creating a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence: Option<String>,
    #[serde(default)]
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
}

impl NewTask {
    /// Shorthand for a task with only a title
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Validate field constraints
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_recurrence(self.recurrence.as_deref())?;
        validate_metadata(self.metadata.as_ref())
    }
}

/// Partial update of a task.
///
/// Nullable fields use `Option<Option<T>>`: absent leaves the value alone,
/// an explicit `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChanges {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub completed_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub recurrence: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<TaskId>>,
    #[serde(default, deserialize_with = "double_option")]
    pub project_id: Option<Option<ProjectId>>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub metadata: Option<Option<serde_json::Value>>,
    #[serde(default)]
    pub tag_ids: Option<Vec<TagId>>,
    /// Version the client last saw. When present, a mismatch is a conflict.
    #[serde(default)]
    pub sync_version: Option<i64>,
}

impl TaskChanges {
    /// Validate the fields that are present
    pub fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(recurrence) = &self.recurrence {
            validate_recurrence(recurrence.as_deref())?;
        }
        if let Some(metadata) = &self.metadata {
            validate_metadata(metadata.as_ref())?;
        }
        Ok(())
    }

    /// Apply the present fields onto `task`. Version and timestamps are the caller's job.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            task.description = normalize_text_option(description.clone());
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(completed_at) = self.completed_at {
            task.completed_at = completed_at;
        }
        if let Some(recurrence) = &self.recurrence {
            task.recurrence = normalize_text_option(recurrence.clone());
        }
        if let Some(parent_id) = self.parent_id {
            task.parent_id = parent_id;
        }
        if let Some(project_id) = self.project_id {
            task.project_id = project_id;
        }
        if let Some(sort_order) = self.sort_order {
            task.sort_order = sort_order;
        }
        if let Some(metadata) = &self.metadata {
            task.metadata.clone_from(metadata);
        }
        if let Some(tag_ids) = &self.tag_ids {
            task.tag_ids = dedup_tags(tag_ids.clone());
        }
    }
}

/// Filters for listing a user's live tasks
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    pub project_id: Option<ProjectId>,
    pub completed: Option<bool>,
    pub priority: Option<TaskPriority>,
    pub due_from: Option<DateTime<Utc>>,
    pub due_to: Option<DateTime<Utc>>,
    /// `Some(None)` selects top-level tasks only
    #[serde(skip)]
    pub parent_id: Option<Option<TaskId>>,
}

fn validate_title(title: &str) -> Result<()> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("Task title must not be empty".into()));
    }
    if title.chars().count() > TASK_TITLE_MAX_LEN {
        return Err(Error::InvalidInput(format!(
            "Task title must be at most {TASK_TITLE_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_recurrence(recurrence: Option<&str>) -> Result<()> {
    if recurrence.is_some_and(|rule| rule.trim().chars().count() > RECURRENCE_MAX_LEN) {
        return Err(Error::InvalidInput(format!(
            "Recurrence must be at most {RECURRENCE_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_metadata(metadata: Option<&serde_json::Value>) -> Result<()> {
    match metadata {
        Some(value) if !value.is_object() => Err(Error::InvalidInput(
            "Task metadata must be a JSON object".into(),
        )),
        _ => Ok(()),
    }
}

fn dedup_tags(mut tag_ids: Vec<TagId>) -> Vec<TagId> {
    tag_ids.sort_unstable();
    tag_ids.dedup();
    tag_ids
}
