//! Project repository implementation

use chrono::{DateTime, Utc};
use libsql::{Connection, Row, Value};

use super::values::{flag, integer, millis, opt_millis, opt_text, parse_id, text};
use crate::error::Result;
use crate::models::{Project, ProjectId, UserId};
use crate::util::{from_millis, from_millis_opt};

const PROJECT_SELECT: &str = "SELECT id, user_id, name, description, color, icon, is_archived,
        sort_order, sync_version, created_at, updated_at, deleted_at
    FROM projects";

/// Trait for project storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ProjectRepository {
    /// Insert a new project
    async fn insert(&self, project: &Project) -> Result<()>;

    /// Get a live project owned by `user_id`
    async fn find(&self, id: &ProjectId, user_id: &UserId) -> Result<Option<Project>>;

    /// Get a project by ID regardless of owner or tombstone
    async fn find_any(&self, id: &ProjectId) -> Result<Option<Project>>;

    /// List a user's live projects
    async fn list(&self, user_id: &UserId, include_archived: bool) -> Result<Vec<Project>>;

    /// Overwrite a live project only if its stored version still equals `expected_version`
    async fn replace_if_version(&self, project: &Project, expected_version: i64) -> Result<bool>;

    /// Projects (including tombstones) updated strictly after `since`
    async fn changed_since(&self, user_id: &UserId, since: DateTime<Utc>)
        -> Result<Vec<Project>>;
}

/// libSQL implementation of `ProjectRepository`
pub struct LibSqlProjectRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlProjectRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_project(row: &Row) -> Result<Project> {
        Ok(Project {
            id: parse_id(&row.get::<String>(0)?, "projects.id")?,
            user_id: parse_id(&row.get::<String>(1)?, "projects.user_id")?,
            name: row.get(2)?,
            description: row.get(3)?,
            color: row.get(4)?,
            icon: row.get(5)?,
            is_archived: row.get::<i64>(6)? != 0,
            sort_order: row.get(7)?,
            sync_version: row.get(8)?,
            created_at: from_millis(row.get(9)?),
            updated_at: from_millis(row.get(10)?),
            deleted_at: from_millis_opt(row.get(11)?),
        })
    }

    async fn query_projects(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Project>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut projects = Vec::new();
        while let Some(row) = rows.next().await? {
            projects.push(Self::parse_project(&row)?);
        }
        Ok(projects)
    }
}

impl ProjectRepository for LibSqlProjectRepository<'_> {
    async fn insert(&self, project: &Project) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO projects (id, user_id, name, description, color, icon, is_archived,
                    sort_order, sync_version, created_at, updated_at, deleted_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(project.id.as_str()),
                    text(project.user_id.as_str()),
                    text(project.name.as_str()),
                    opt_text(project.description.as_deref()),
                    text(project.color.as_str()),
                    opt_text(project.icon.as_deref()),
                    flag(project.is_archived),
                    integer(project.sort_order),
                    integer(project.sync_version),
                    millis(&project.created_at),
                    millis(&project.updated_at),
                    opt_millis(project.deleted_at.as_ref()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn find(&self, id: &ProjectId, user_id: &UserId) -> Result<Option<Project>> {
        Ok(self
            .query_projects(
                &format!("{PROJECT_SELECT} WHERE id = ? AND user_id = ? AND deleted_at IS NULL"),
                vec![text(id.as_str()), text(user_id.as_str())],
            )
            .await?
            .into_iter()
            .next())
    }

    async fn find_any(&self, id: &ProjectId) -> Result<Option<Project>> {
        Ok(self
            .query_projects(
                &format!("{PROJECT_SELECT} WHERE id = ?"),
                vec![text(id.as_str())],
            )
            .await?
            .into_iter()
            .next())
    }

    async fn list(&self, user_id: &UserId, include_archived: bool) -> Result<Vec<Project>> {
        let archived_clause = if include_archived {
            ""
        } else {
            " AND is_archived = 0"
        };
        self.query_projects(
            &format!(
                "{PROJECT_SELECT} WHERE user_id = ? AND deleted_at IS NULL{archived_clause}
                 ORDER BY sort_order ASC, created_at DESC"
            ),
            vec![text(user_id.as_str())],
        )
        .await
    }

    async fn replace_if_version(&self, project: &Project, expected_version: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "UPDATE projects SET name = ?, description = ?, color = ?, icon = ?,
                    is_archived = ?, sort_order = ?, sync_version = ?, updated_at = ?,
                    deleted_at = ?
                 WHERE id = ? AND user_id = ? AND sync_version = ? AND deleted_at IS NULL",
                vec![
                    text(project.name.as_str()),
                    opt_text(project.description.as_deref()),
                    text(project.color.as_str()),
                    opt_text(project.icon.as_deref()),
                    flag(project.is_archived),
                    integer(project.sort_order),
                    integer(project.sync_version),
                    millis(&project.updated_at),
                    opt_millis(project.deleted_at.as_ref()),
                    text(project.id.as_str()),
                    text(project.user_id.as_str()),
                    integer(expected_version),
                ],
            )
            .await?;
        Ok(affected == 1)
    }

    async fn changed_since(
        &self,
        user_id: &UserId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Project>> {
        self.query_projects(
            &format!("{PROJECT_SELECT} WHERE user_id = ? AND updated_at > ? ORDER BY updated_at ASC"),
            vec![text(user_id.as_str()), millis(&since)],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::insert_user;
    use crate::db::Database;
    use crate::models::NewProject;
    use crate::util::now;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_find() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlProjectRepository::new(conn);

        let project = Project::from_new(ProjectId::new(), user, NewProject::named("Home"), now());
        repo.insert(&project).await.unwrap();
        assert_eq!(repo.find(&project.id, &user).await.unwrap(), Some(project));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_hides_archived_unless_requested() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlProjectRepository::new(conn);

        let active = Project::from_new(ProjectId::new(), user, NewProject::named("Active"), now());
        let mut archived =
            Project::from_new(ProjectId::new(), user, NewProject::named("Old"), now());
        archived.is_archived = true;
        repo.insert(&active).await.unwrap();
        repo.insert(&archived).await.unwrap();

        assert_eq!(repo.list(&user, false).await.unwrap().len(), 1);
        assert_eq!(repo.list(&user, true).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replace_if_version_is_conditional() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlProjectRepository::new(conn);

        let project = Project::from_new(ProjectId::new(), user, NewProject::named("Work"), now());
        repo.insert(&project).await.unwrap();

        let mut next = project.clone();
        next.name = "Office".into();
        next.sync_version = 2;
        assert!(!repo.replace_if_version(&next, 5).await.unwrap());
        assert!(repo.replace_if_version(&next, 1).await.unwrap());
        assert_eq!(repo.find(&project.id, &user).await.unwrap().unwrap().name, "Office");
    }
}
