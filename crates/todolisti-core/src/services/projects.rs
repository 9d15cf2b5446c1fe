//! Project service and its sync adapter.

use libsql::Connection;

use super::audit::record;
use super::permissions::authorize_on;
use super::sync::SyncTarget;
use super::{Access, DatabaseService};
use crate::db::{with_transaction, LibSqlProjectRepository, ProjectRepository};
use crate::error::Error;
use crate::models::{
    AuditAction, EntityType, NewAuditEntry, NewProject, PermissionLevel, Project, ProjectChanges,
    ProjectId, UserId,
};
use crate::util::now;
use crate::Result;

const ENTITY: &str = "project";

async fn save_successor(
    conn: &Connection,
    current: &Project,
    mut next: Project,
) -> Result<Option<Project>> {
    next.sync_version = current.sync_version + 1;
    next.updated_at = now();
    let written = LibSqlProjectRepository::new(conn)
        .replace_if_version(&next, current.sync_version)
        .await?;
    Ok(written.then_some(next))
}

async fn find_live(conn: &Connection, id: &ProjectId, owner: &UserId) -> Result<Project> {
    LibSqlProjectRepository::new(conn)
        .find(id, owner)
        .await?
        .ok_or_else(|| Error::not_found("Project", id))
}

#[derive(Clone)]
pub struct ProjectService {
    db: DatabaseService,
}

impl ProjectService {
    #[must_use]
    pub const fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    pub async fn create(&self, access: Access, input: NewProject) -> Result<Project> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Edit).await?;
        input.validate()?;

        with_transaction(conn, async {
            let project = Project::from_new(ProjectId::new(), access.owner, input, now());
            LibSqlProjectRepository::new(conn).insert(&project).await?;
            record(
                conn,
                NewAuditEntry::new(access.acting, AuditAction::ProjectCreate, ENTITY, project.id)
                    .on_behalf_of(access.owner)
                    .with_new(&project),
            )
            .await?;
            Ok(project)
        })
        .await
    }

    pub async fn list(&self, access: Access, include_archived: bool) -> Result<Vec<Project>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::View).await?;
        LibSqlProjectRepository::new(conn)
            .list(&access.owner, include_archived)
            .await
    }

    pub async fn get(&self, access: Access, id: &ProjectId) -> Result<Project> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::View).await?;
        find_live(conn, id, &access.owner).await
    }

    pub async fn update(
        &self,
        access: Access,
        id: &ProjectId,
        changes: ProjectChanges,
    ) -> Result<Project> {
        self.mutate(access, id, changes, AuditAction::ProjectUpdate)
            .await
    }

    pub async fn archive(&self, access: Access, id: &ProjectId) -> Result<Project> {
        self.mutate(access, id, ProjectChanges::archive(), AuditAction::ProjectArchive)
            .await
    }

    async fn mutate(
        &self,
        access: Access,
        id: &ProjectId,
        changes: ProjectChanges,
        action: AuditAction,
    ) -> Result<Project> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Edit).await?;
        changes.validate()?;

        with_transaction(conn, async {
            let current = find_live(conn, id, &access.owner).await?;
            if let Some(expected) = changes.sync_version {
                if expected != current.sync_version {
                    return Err(Error::Conflict(format!(
                        "Project {id} is at version {}, not {expected}",
                        current.sync_version
                    )));
                }
            }

            let mut next = current.clone();
            changes.apply_to(&mut next);
            let updated = save_successor(conn, &current, next)
                .await?
                .ok_or_else(|| Error::Conflict(format!("Project {id} was modified concurrently")))?;

            record(
                conn,
                NewAuditEntry::new(access.acting, action, ENTITY, id)
                    .on_behalf_of(access.owner)
                    .with_previous(&current)
                    .with_new(&updated),
            )
            .await?;
            Ok(updated)
        })
        .await
    }

    /// Soft-delete the project. Its tasks keep their project reference.
    pub async fn delete(&self, access: Access, id: &ProjectId) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Full).await?;

        with_transaction(conn, async {
            let current = find_live(conn, id, &access.owner).await?;
            let mut next = current.clone();
            next.deleted_at = Some(now());
            save_successor(conn, &current, next)
                .await?
                .ok_or_else(|| Error::Conflict(format!("Project {id} was modified concurrently")))?;

            record(
                conn,
                NewAuditEntry::new(access.acting, AuditAction::ProjectDelete, ENTITY, id)
                    .on_behalf_of(access.owner)
                    .with_previous(&current),
            )
            .await?;
            Ok(())
        })
        .await
    }
}

pub(crate) struct ProjectSyncTarget<'a> {
    conn: &'a Connection,
}

impl<'a> ProjectSyncTarget<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncTarget for ProjectSyncTarget<'_> {
    type Entity = Project;
    type Id = ProjectId;

    const ENTITY_TYPE: EntityType = EntityType::Project;

    async fn find_live(&self, id: &ProjectId, user_id: &UserId) -> Result<Option<Project>> {
        LibSqlProjectRepository::new(self.conn).find(id, user_id).await
    }

    async fn find_current(&self, id: &ProjectId, user_id: &UserId) -> Result<Option<Project>> {
        Ok(LibSqlProjectRepository::new(self.conn)
            .find_any(id)
            .await?
            .filter(|project| project.user_id == *user_id))
    }

    async fn id_taken(&self, id: &ProjectId) -> Result<bool> {
        Ok(LibSqlProjectRepository::new(self.conn)
            .find_any(id)
            .await?
            .is_some())
    }

    async fn create(
        &self,
        id: ProjectId,
        user_id: UserId,
        data: &serde_json::Value,
    ) -> Result<Project> {
        let input: NewProject = serde_json::from_value(data.clone())?;
        input.validate()?;
        let project = Project::from_new(id, user_id, input, now());
        LibSqlProjectRepository::new(self.conn).insert(&project).await?;
        Ok(project)
    }

    async fn update(
        &self,
        existing: &Project,
        data: &serde_json::Value,
    ) -> Result<Option<Project>> {
        let changes: ProjectChanges = serde_json::from_value(data.clone())?;
        changes.validate()?;
        let mut next = existing.clone();
        changes.apply_to(&mut next);
        save_successor(self.conn, existing, next).await
    }

    async fn delete(&self, existing: &Project) -> Result<bool> {
        let mut next = existing.clone();
        next.deleted_at = Some(now());
        Ok(save_successor(self.conn, existing, next).await?.is_some())
    }
}
