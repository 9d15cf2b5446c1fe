//! Task service: CRUD over versioned tasks, with delegated access.

use libsql::Connection;

use super::audit::record;
use super::permissions::authorize_on;
use super::sync::SyncTarget;
use super::{Access, DatabaseService};
use crate::db::{
    with_transaction, LibSqlProjectRepository, LibSqlTagRepository, LibSqlTaskRepository,
    ProjectRepository, TagRepository, TaskRepository,
};
use crate::error::Error;
use crate::models::{
    AuditAction, EntityType, NewAuditEntry, NewTask, PermissionLevel, Task, TaskChanges,
    TaskFilter, TaskId, UserId,
};
use crate::util::now;
use crate::Result;

const ENTITY: &str = "task";

/// Make sure everything `task` points at belongs to its owner.
async fn check_references(conn: &Connection, task: &Task) -> Result<()> {
    if let Some(project_id) = task.project_id {
        if LibSqlProjectRepository::new(conn)
            .find(&project_id, &task.user_id)
            .await?
            .is_none()
        {
            return Err(Error::InvalidInput(format!(
                "Project {project_id} does not exist"
            )));
        }
    }

    if let Some(parent_id) = task.parent_id {
        if parent_id == task.id {
            return Err(Error::InvalidInput("A task cannot be its own parent".into()));
        }
        if LibSqlTaskRepository::new(conn)
            .find(&parent_id, &task.user_id)
            .await?
            .is_none()
        {
            return Err(Error::InvalidInput(format!(
                "Parent task {parent_id} does not exist"
            )));
        }
    }

    if !task.tag_ids.is_empty() {
        let owned = LibSqlTagRepository::new(conn)
            .count_owned(&task.user_id, &task.tag_ids)
            .await?;
        if owned != task.tag_ids.len() {
            return Err(Error::InvalidInput(
                "Every tag must exist and belong to the task owner".into(),
            ));
        }
    }

    Ok(())
}

/// Persist `next` as the successor of `current`, bumping the version.
///
/// Returns `None` when the stored row no longer carries `current`'s version.
async fn save_successor(conn: &Connection, current: &Task, mut next: Task) -> Result<Option<Task>> {
    next.sync_version = current.sync_version + 1;
    next.updated_at = now();
    let written = LibSqlTaskRepository::new(conn)
        .replace_if_version(&next, current.sync_version)
        .await?;
    Ok(written.then_some(next))
}

async fn find_live(conn: &Connection, id: &TaskId, owner: &UserId) -> Result<Task> {
    LibSqlTaskRepository::new(conn)
        .find(id, owner)
        .await?
        .ok_or_else(|| Error::not_found("Task", id))
}

fn lost_race(id: &TaskId) -> Error {
    Error::Conflict(format!("Task {id} was modified concurrently"))
}

#[derive(Clone)]
pub struct TaskService {
    db: DatabaseService,
}

impl TaskService {
    #[must_use]
    pub const fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    pub async fn create(&self, access: Access, input: NewTask) -> Result<Task> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Edit).await?;
        input.validate()?;

        with_transaction(conn, async {
            let task = Task::from_new(TaskId::new(), access.owner, input, now());
            check_references(conn, &task).await?;
            LibSqlTaskRepository::new(conn).insert(&task).await?;

            record(
                conn,
                NewAuditEntry::new(access.acting, AuditAction::TaskCreate, ENTITY, task.id)
                    .on_behalf_of(access.owner)
                    .with_new(&task),
            )
            .await?;
            Ok(task)
        })
        .await
    }

    /// The owner's live tasks matching `filter`.
    pub async fn list(&self, access: Access, filter: &TaskFilter) -> Result<Vec<Task>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::View).await?;
        LibSqlTaskRepository::new(conn)
            .list(&access.owner, filter)
            .await
    }

    pub async fn get(&self, access: Access, id: &TaskId) -> Result<Task> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::View).await?;
        find_live(conn, id, &access.owner).await
    }

    /// Apply a partial update.
    ///
    /// When `changes.sync_version` is set and differs from the stored version
    /// the update is rejected with `Conflict`.
    pub async fn update(&self, access: Access, id: &TaskId, changes: TaskChanges) -> Result<Task> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Edit).await?;
        changes.validate()?;

        with_transaction(conn, async {
            let current = find_live(conn, id, &access.owner).await?;
            if let Some(expected) = changes.sync_version {
                if expected != current.sync_version {
                    return Err(Error::Conflict(format!(
                        "Task {id} is at version {}, not {expected}",
                        current.sync_version
                    )));
                }
            }

            let mut next = current.clone();
            changes.apply_to(&mut next);
            check_references(conn, &next).await?;
            let updated = save_successor(conn, &current, next)
                .await?
                .ok_or_else(|| lost_race(id))?;

            record(
                conn,
                NewAuditEntry::new(access.acting, AuditAction::TaskUpdate, ENTITY, id)
                    .on_behalf_of(access.owner)
                    .with_previous(&current)
                    .with_new(&updated),
            )
            .await?;
            Ok(updated)
        })
        .await
    }

    /// Mark the task completed now. Completing again refreshes the timestamp.
    pub async fn complete(&self, access: Access, id: &TaskId) -> Result<Task> {
        self.set_completion(access, id, true).await
    }

    pub async fn uncomplete(&self, access: Access, id: &TaskId) -> Result<Task> {
        self.set_completion(access, id, false).await
    }

    async fn set_completion(&self, access: Access, id: &TaskId, completed: bool) -> Result<Task> {
        let action = if completed {
            AuditAction::TaskComplete
        } else {
            AuditAction::TaskUncomplete
        };

        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Edit).await?;

        with_transaction(conn, async {
            let current = find_live(conn, id, &access.owner).await?;
            let mut next = current.clone();
            next.completed_at = completed.then(now);
            let updated = save_successor(conn, &current, next)
                .await?
                .ok_or_else(|| lost_race(id))?;

            record(
                conn,
                NewAuditEntry::new(access.acting, action, ENTITY, id)
                    .on_behalf_of(access.owner)
                    .with_previous(&serde_json::json!({ "completedAt": current.completed_at }))
                    .with_new(&serde_json::json!({ "completedAt": updated.completed_at })),
            )
            .await?;
            Ok(updated)
        })
        .await
    }

    /// Soft-delete the task, leaving a tombstone for sync.
    pub async fn delete(&self, access: Access, id: &TaskId) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Full).await?;

        with_transaction(conn, async {
            let current = find_live(conn, id, &access.owner).await?;
            let mut next = current.clone();
            next.deleted_at = Some(now());
            save_successor(conn, &current, next)
                .await?
                .ok_or_else(|| lost_race(id))?;

            record(
                conn,
                NewAuditEntry::new(access.acting, AuditAction::TaskDelete, ENTITY, id)
                    .on_behalf_of(access.owner)
                    .with_previous(&current),
            )
            .await?;
            Ok(())
        })
        .await?;

        tracing::debug!(task = %id, "Deleted task");
        Ok(())
    }
}

/// Sync adapter for tasks on an already locked connection.
pub(crate) struct TaskSyncTarget<'a> {
    conn: &'a Connection,
}

impl<'a> TaskSyncTarget<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncTarget for TaskSyncTarget<'_> {
    type Entity = Task;
    type Id = TaskId;

    const ENTITY_TYPE: EntityType = EntityType::Task;

    async fn find_live(&self, id: &TaskId, user_id: &UserId) -> Result<Option<Task>> {
        LibSqlTaskRepository::new(self.conn).find(id, user_id).await
    }

    async fn find_current(&self, id: &TaskId, user_id: &UserId) -> Result<Option<Task>> {
        Ok(LibSqlTaskRepository::new(self.conn)
            .find_any(id)
            .await?
            .filter(|task| task.user_id == *user_id))
    }

    async fn id_taken(&self, id: &TaskId) -> Result<bool> {
        Ok(LibSqlTaskRepository::new(self.conn)
            .find_any(id)
            .await?
            .is_some())
    }

    async fn create(&self, id: TaskId, user_id: UserId, data: &serde_json::Value) -> Result<Task> {
        let input: NewTask = serde_json::from_value(data.clone())?;
        input.validate()?;
        let at = now();
        let mut task = Task::from_new(id, user_id, input, at);
        task.last_synced_at = Some(at);
        check_references(self.conn, &task).await?;
        LibSqlTaskRepository::new(self.conn).insert(&task).await?;
        Ok(task)
    }

    async fn update(&self, existing: &Task, data: &serde_json::Value) -> Result<Option<Task>> {
        let changes: TaskChanges = serde_json::from_value(data.clone())?;
        changes.validate()?;
        let mut next = existing.clone();
        changes.apply_to(&mut next);
        next.last_synced_at = Some(now());
        check_references(self.conn, &next).await?;
        save_successor(self.conn, existing, next).await
    }

    async fn delete(&self, existing: &Task) -> Result<bool> {
        let at = now();
        let mut next = existing.clone();
        next.deleted_at = Some(at);
        next.last_synced_at = Some(at);
        Ok(save_successor(self.conn, existing, next).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditQuery, NewProject, NewTag, TaskPriority};
    use crate::services::test_support::{grant, user};
    use crate::services::Services;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Services, UserId) {
        let services = Services::in_memory().await.unwrap();
        let owner = user(&services, "owner@example.com").await;
        (services, owner)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_and_get() {
        let (services, owner) = setup().await;
        let access = Access::own(owner);

        let mut input = NewTask::titled("  Buy milk ");
        input.priority = Some(TaskPriority::High);
        let task = services.tasks.create(access, input).await.unwrap();
        assert_eq!(task.title, "Buy milk");
        assert_eq!(task.sync_version, 1);

        let fetched = services.tasks.get(access, &task.id).await.unwrap();
        assert_eq!(fetched, task);

        let err = services.tasks.get(access, &TaskId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_mutation_bumps_version() {
        let (services, owner) = setup().await;
        let access = Access::own(owner);
        let tasks = &services.tasks;
        let task = tasks.create(access, NewTask::titled("Report")).await.unwrap();

        let updated = tasks
            .update(
                access,
                &task.id,
                TaskChanges {
                    title: Some("Quarterly report".into()),
                    ..TaskChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.sync_version, 2);

        let completed = tasks.complete(access, &task.id).await.unwrap();
        assert_eq!(completed.sync_version, 3);
        assert!(completed.is_completed());

        let recompleted = tasks.complete(access, &task.id).await.unwrap();
        assert_eq!(recompleted.sync_version, 4);

        let reopened = tasks.uncomplete(access, &task.id).await.unwrap();
        assert_eq!(reopened.sync_version, 5);
        assert!(!reopened.is_completed());

        tasks.delete(access, &task.id).await.unwrap();
        let err = tasks.get(access, &task.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let db = services.database.lock().await;
        let tombstone = LibSqlTaskRepository::new(db.connection())
            .find_any(&task.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tombstone.sync_version, 6);
        assert!(tombstone.is_deleted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_expected_version_conflicts() {
        let (services, owner) = setup().await;
        let access = Access::own(owner);
        let task = services
            .tasks
            .create(access, NewTask::titled("Report"))
            .await
            .unwrap();
        services.tasks.complete(access, &task.id).await.unwrap();

        let err = services
            .tasks
            .update(
                access,
                &task.id,
                TaskChanges {
                    title: Some("Stale".into()),
                    sync_version: Some(1),
                    ..TaskChanges::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(services.tasks.get(access, &task.id).await.unwrap().title, "Report");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delegated_edit_can_update_but_not_delete() {
        let (services, owner) = setup().await;
        let assistant = user(&services, "assistant@example.com").await;
        grant(&services, owner, assistant, PermissionLevel::Edit).await;

        let task = services
            .tasks
            .create(Access::own(owner), NewTask::titled("Plan trip"))
            .await
            .unwrap();
        let delegated = Access::delegated(assistant, owner);

        let updated = services
            .tasks
            .update(
                delegated,
                &task.id,
                TaskChanges {
                    title: Some("Plan trip to Lisbon".into()),
                    ..TaskChanges::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.sync_version, 2);
        assert_eq!(updated.user_id, owner);

        let entries = services
            .audit
            .find_by_user(&assistant, &AuditQuery::default())
            .await
            .unwrap();
        let update_entry = entries
            .iter()
            .find(|entry| entry.action == AuditAction::TaskUpdate)
            .unwrap();
        assert_eq!(update_entry.target_user_id, Some(owner));
        assert_eq!(update_entry.entity_id, task.id.to_string());

        let err = services.tasks.delete(delegated, &task.id).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert_eq!(
            services.tasks.get(Access::own(owner), &task.id).await.unwrap().sync_version,
            2
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn strangers_are_forbidden_even_for_missing_tasks() {
        let (services, owner) = setup().await;
        let stranger = user(&services, "stranger@example.com").await;
        let access = Access::delegated(stranger, owner);

        let err = services.tasks.get(access, &TaskId::new()).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        let err = services
            .tasks
            .list(access, &TaskFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn view_grant_reads_only() {
        let (services, owner) = setup().await;
        let assistant = user(&services, "assistant@example.com").await;
        grant(&services, owner, assistant, PermissionLevel::View).await;
        services
            .tasks
            .create(Access::own(owner), NewTask::titled("Visible"))
            .await
            .unwrap();
        let delegated = Access::delegated(assistant, owner);

        let listed = services
            .tasks
            .list(delegated, &TaskFilter::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        let err = services
            .tasks
            .create(delegated, NewTask::titled("Sneaky"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn references_must_belong_to_owner() {
        let (services, owner) = setup().await;
        let other = user(&services, "other@example.com").await;
        let foreign_project = services
            .projects
            .create(Access::own(other), NewProject::named("Theirs"))
            .await
            .unwrap();
        let foreign_tag = services
            .tags
            .create(
                Access::own(other),
                NewTag {
                    name: "theirs".into(),
                    color: None,
                },
            )
            .await
            .unwrap();

        let mut input = NewTask::titled("Mine");
        input.project_id = Some(foreign_project.id);
        let err = services
            .tasks
            .create(Access::own(owner), input)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let mut input = NewTask::titled("Mine");
        input.tag_ids = vec![foreign_tag.id];
        let err = services
            .tasks
            .create(Access::own(owner), input)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_filters_and_subtasks() {
        let (services, owner) = setup().await;
        let access = Access::own(owner);
        let tasks = &services.tasks;

        let parent = tasks.create(access, NewTask::titled("Parent")).await.unwrap();
        let mut child = NewTask::titled("Child");
        child.parent_id = Some(parent.id);
        let child = tasks.create(access, child).await.unwrap();
        tasks.complete(access, &child.id).await.unwrap();

        let top_level = tasks
            .list(
                access,
                &TaskFilter {
                    parent_id: Some(None),
                    ..TaskFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(top_level.len(), 1);
        assert_eq!(top_level[0].id, parent.id);

        let open = tasks
            .list(
                access,
                &TaskFilter {
                    completed: Some(false),
                    ..TaskFilter::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(open.len(), 1);

        let err = tasks
            .update(
                access,
                &parent.id,
                TaskChanges {
                    parent_id: Some(Some(parent.id)),
                    ..TaskChanges::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_writes_one_audit_entry() {
        let (services, owner) = setup().await;
        let task = services
            .tasks
            .create(Access::own(owner), NewTask::titled("Audited"))
            .await
            .unwrap();

        let entries = services
            .audit
            .find_by_entity("task", &task.id.to_string(), &AuditQuery::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::TaskCreate);
        assert_eq!(entries[0].target_user_id, None);
        assert_eq!(entries[0].new_state.as_ref().unwrap()["title"], "Audited");
    }
}
