//! Task repository implementation

use chrono::{DateTime, Utc};
use libsql::{Connection, Row, Value};

use super::values::{
    integer, millis, opt_json, opt_millis, opt_text, parse_id, parse_opt_id, parse_opt_json, text,
};
use crate::error::Result;
use crate::models::{TagId, Task, TaskFilter, TaskId, TaskPriority, UserId};
use crate::util::{from_millis, from_millis_opt};

const TASK_SELECT: &str = "SELECT t.id, t.user_id, t.project_id, t.parent_id, t.title,
        t.description, t.priority, t.due_date, t.completed_at, t.recurrence, t.sort_order,
        t.google_event_id, t.metadata, t.sync_version, t.last_synced_at, t.created_at,
        t.updated_at, t.deleted_at,
        (SELECT GROUP_CONCAT(tt.tag_id) FROM task_tags tt WHERE tt.task_id = t.id)
    FROM tasks t";

/// Trait for task storage operations (async)
#[allow(async_fn_in_trait)]
pub trait TaskRepository {
    /// Insert a new task with its tag links
    async fn insert(&self, task: &Task) -> Result<()>;

    /// Get a live (not soft-deleted) task owned by `user_id`
    async fn find(&self, id: &TaskId, user_id: &UserId) -> Result<Option<Task>>;

    /// Get a task by ID regardless of owner or tombstone
    async fn find_any(&self, id: &TaskId) -> Result<Option<Task>>;

    /// List a user's live tasks, ordered by sort order then newest first
    async fn list(&self, user_id: &UserId, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Overwrite a live task only if its stored version still equals `expected_version`.
    ///
    /// Returns `false` when the row was changed, deleted, or never existed.
    async fn replace_if_version(&self, task: &Task, expected_version: i64) -> Result<bool>;

    /// Tasks (including tombstones) updated strictly after `since`
    async fn changed_since(&self, user_id: &UserId, since: DateTime<Utc>) -> Result<Vec<Task>>;
}

/// libSQL implementation of `TaskRepository`
pub struct LibSqlTaskRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlTaskRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a task from a row produced by `TASK_SELECT`
    fn parse_task(row: &Row) -> Result<Task> {
        let mut tag_ids = row
            .get::<Option<String>>(18)?
            .map(|joined| {
                joined
                    .split(',')
                    .map(|raw| parse_id::<TagId>(raw, "task_tags.tag_id"))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        tag_ids.sort_unstable();

        Ok(Task {
            id: parse_id(&row.get::<String>(0)?, "tasks.id")?,
            user_id: parse_id(&row.get::<String>(1)?, "tasks.user_id")?,
            project_id: parse_opt_id(row.get(2)?, "tasks.project_id")?,
            parent_id: parse_opt_id(row.get(3)?, "tasks.parent_id")?,
            title: row.get(4)?,
            description: row.get(5)?,
            priority: TaskPriority::from_db(row.get(6)?),
            due_date: from_millis_opt(row.get(7)?),
            completed_at: from_millis_opt(row.get(8)?),
            recurrence: row.get(9)?,
            sort_order: row.get(10)?,
            google_event_id: row.get(11)?,
            metadata: parse_opt_json(row.get(12)?)?,
            tag_ids,
            sync_version: row.get(13)?,
            last_synced_at: from_millis_opt(row.get(14)?),
            created_at: from_millis(row.get(15)?),
            updated_at: from_millis(row.get(16)?),
            deleted_at: from_millis_opt(row.get(17)?),
        })
    }

    async fn query_tasks(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Task>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            tasks.push(Self::parse_task(&row)?);
        }
        Ok(tasks)
    }

    async fn query_task(&self, sql: &str, params: Vec<Value>) -> Result<Option<Task>> {
        Ok(self.query_tasks(sql, params).await?.into_iter().next())
    }

    /// Replace the tag links of a task
    async fn write_tags(&self, task: &Task) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM task_tags WHERE task_id = ?",
                libsql::params![task.id.as_str()],
            )
            .await?;

        for tag_id in &task.tag_ids {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?, ?)",
                    libsql::params![task.id.as_str(), tag_id.as_str()],
                )
                .await?;
        }

        Ok(())
    }
}

fn priority_value(priority: TaskPriority) -> Value {
    integer(i64::from(u8::from(priority)))
}

impl TaskRepository for LibSqlTaskRepository<'_> {
    async fn insert(&self, task: &Task) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tasks (id, user_id, project_id, parent_id, title, description,
                    priority, due_date, completed_at, recurrence, sort_order, google_event_id,
                    metadata, sync_version, last_synced_at, created_at, updated_at, deleted_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(task.id.as_str()),
                    text(task.user_id.as_str()),
                    opt_text(task.project_id.map(|id| id.as_str())),
                    opt_text(task.parent_id.map(|id| id.as_str())),
                    text(task.title.as_str()),
                    opt_text(task.description.as_deref()),
                    priority_value(task.priority),
                    opt_millis(task.due_date.as_ref()),
                    opt_millis(task.completed_at.as_ref()),
                    opt_text(task.recurrence.as_deref()),
                    integer(task.sort_order),
                    opt_text(task.google_event_id.as_deref()),
                    opt_json(task.metadata.as_ref())?,
                    integer(task.sync_version),
                    opt_millis(task.last_synced_at.as_ref()),
                    millis(&task.created_at),
                    millis(&task.updated_at),
                    opt_millis(task.deleted_at.as_ref()),
                ],
            )
            .await?;

        self.write_tags(task).await
    }

    async fn find(&self, id: &TaskId, user_id: &UserId) -> Result<Option<Task>> {
        self.query_task(
            &format!("{TASK_SELECT} WHERE t.id = ? AND t.user_id = ? AND t.deleted_at IS NULL"),
            vec![text(id.as_str()), text(user_id.as_str())],
        )
        .await
    }

    async fn find_any(&self, id: &TaskId) -> Result<Option<Task>> {
        self.query_task(
            &format!("{TASK_SELECT} WHERE t.id = ?"),
            vec![text(id.as_str())],
        )
        .await
    }

    async fn list(&self, user_id: &UserId, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = format!("{TASK_SELECT} WHERE t.user_id = ? AND t.deleted_at IS NULL");
        let mut params = vec![text(user_id.as_str())];

        if let Some(project_id) = filter.project_id {
            sql.push_str(" AND t.project_id = ?");
            params.push(text(project_id.as_str()));
        }
        match filter.completed {
            Some(true) => sql.push_str(" AND t.completed_at IS NOT NULL"),
            Some(false) => sql.push_str(" AND t.completed_at IS NULL"),
            None => {}
        }
        if let Some(priority) = filter.priority {
            sql.push_str(" AND t.priority = ?");
            params.push(priority_value(priority));
        }
        if let Some(due_from) = &filter.due_from {
            sql.push_str(" AND t.due_date >= ?");
            params.push(millis(due_from));
        }
        if let Some(due_to) = &filter.due_to {
            sql.push_str(" AND t.due_date <= ?");
            params.push(millis(due_to));
        }
        match filter.parent_id {
            Some(Some(parent_id)) => {
                sql.push_str(" AND t.parent_id = ?");
                params.push(text(parent_id.as_str()));
            }
            Some(None) => sql.push_str(" AND t.parent_id IS NULL"),
            None => {}
        }
        sql.push_str(" ORDER BY t.sort_order ASC, t.created_at DESC");

        self.query_tasks(&sql, params).await
    }

    async fn replace_if_version(&self, task: &Task, expected_version: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "UPDATE tasks SET project_id = ?, parent_id = ?, title = ?, description = ?,
                    priority = ?, due_date = ?, completed_at = ?, recurrence = ?, sort_order = ?,
                    google_event_id = ?, metadata = ?, sync_version = ?, last_synced_at = ?,
                    updated_at = ?, deleted_at = ?
                 WHERE id = ? AND user_id = ? AND sync_version = ? AND deleted_at IS NULL",
                vec![
                    opt_text(task.project_id.map(|id| id.as_str())),
                    opt_text(task.parent_id.map(|id| id.as_str())),
                    text(task.title.as_str()),
                    opt_text(task.description.as_deref()),
                    priority_value(task.priority),
                    opt_millis(task.due_date.as_ref()),
                    opt_millis(task.completed_at.as_ref()),
                    opt_text(task.recurrence.as_deref()),
                    integer(task.sort_order),
                    opt_text(task.google_event_id.as_deref()),
                    opt_json(task.metadata.as_ref())?,
                    integer(task.sync_version),
                    opt_millis(task.last_synced_at.as_ref()),
                    millis(&task.updated_at),
                    opt_millis(task.deleted_at.as_ref()),
                    text(task.id.as_str()),
                    text(task.user_id.as_str()),
                    integer(expected_version),
                ],
            )
            .await?;

        if affected == 0 {
            return Ok(false);
        }

        self.write_tags(task).await?;
        Ok(true)
    }

    async fn changed_since(&self, user_id: &UserId, since: DateTime<Utc>) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!("{TASK_SELECT} WHERE t.user_id = ? AND t.updated_at > ? ORDER BY t.updated_at ASC"),
            vec![text(user_id.as_str()), millis(&since)],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_tag, insert_user};
    use crate::db::Database;
    use crate::models::NewTask;
    use crate::util::now;
    use pretty_assertions::assert_eq;

    fn task_for(user_id: UserId, title: &str) -> Task {
        Task::from_new(TaskId::new(), user_id, NewTask::titled(title), now())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_find_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let tag = insert_tag(conn, user, "home").await;
        let repo = LibSqlTaskRepository::new(conn);

        let mut task = task_for(user, "Buy milk");
        task.tag_ids = vec![tag];
        task.metadata = Some(serde_json::json!({"source": "mobile"}));
        repo.insert(&task).await.unwrap();

        let found = repo.find(&task.id, &user).await.unwrap().unwrap();
        assert_eq!(found, task);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_find_is_scoped_to_owner() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let owner = insert_user(conn, "owner@example.com").await;
        let other = insert_user(conn, "other@example.com").await;
        let repo = LibSqlTaskRepository::new(conn);

        let task = task_for(owner, "Private");
        repo.insert(&task).await.unwrap();

        assert!(repo.find(&task.id, &other).await.unwrap().is_none());
        assert!(repo.find_any(&task.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_if_version_rejects_stale_version() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlTaskRepository::new(conn);

        let task = task_for(user, "Draft");
        repo.insert(&task).await.unwrap();

        let mut next = task.clone();
        next.title = "Final".into();
        next.sync_version = 2;
        assert!(repo.replace_if_version(&next, 1).await.unwrap());

        let mut stale = task.clone();
        stale.title = "Stale".into();
        stale.sync_version = 2;
        assert!(!repo.replace_if_version(&stale, 1).await.unwrap());

        let stored = repo.find(&task.id, &user).await.unwrap().unwrap();
        assert_eq!(stored.title, "Final");
        assert_eq!(stored.sync_version, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tombstones_hidden_from_list_but_in_changes() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlTaskRepository::new(conn);
        let before = now() - chrono::Duration::seconds(1);

        let task = task_for(user, "Gone soon");
        repo.insert(&task).await.unwrap();
        let mut deleted = task.clone();
        deleted.deleted_at = Some(now());
        deleted.sync_version = 2;
        assert!(repo.replace_if_version(&deleted, 1).await.unwrap());

        assert!(repo.list(&user, &TaskFilter::default()).await.unwrap().is_empty());
        assert!(repo.find(&task.id, &user).await.unwrap().is_none());
        let changes = repo.changed_since(&user, before).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_deleted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_filters() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlTaskRepository::new(conn);

        let parent = task_for(user, "Parent");
        repo.insert(&parent).await.unwrap();
        let mut child = task_for(user, "Child");
        child.parent_id = Some(parent.id);
        child.priority = TaskPriority::High;
        child.completed_at = Some(now());
        repo.insert(&child).await.unwrap();

        let top_level = TaskFilter {
            parent_id: Some(None),
            ..TaskFilter::default()
        };
        let tasks = repo.list(&user, &top_level).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, parent.id);

        let completed = TaskFilter {
            completed: Some(true),
            priority: Some(TaskPriority::High),
            ..TaskFilter::default()
        };
        let tasks = repo.list(&user, &completed).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, child.id);
    }
}
