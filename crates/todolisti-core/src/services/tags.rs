//! Tag service. Tags are plain rows: no versioning, no audit trail.

use super::permissions::authorize_on;
use super::{Access, DatabaseService};
use crate::db::{LibSqlTagRepository, TagRepository};
use crate::error::Error;
use crate::models::{NewTag, PermissionLevel, Tag, TagChanges, TagId};
use crate::util::now;
use crate::Result;

#[derive(Clone)]
pub struct TagService {
    db: DatabaseService,
}

impl TagService {
    #[must_use]
    pub const fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    /// Create a tag. Names are unique per owner, ignoring case.
    pub async fn create(&self, access: Access, input: NewTag) -> Result<Tag> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Edit).await?;
        input.validate()?;

        let tag = Tag::new(access.owner, input, now());
        LibSqlTagRepository::new(conn).insert(&tag).await?;
        Ok(tag)
    }

    /// The owner's tags ordered by name.
    pub async fn list(&self, access: Access) -> Result<Vec<Tag>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::View).await?;
        LibSqlTagRepository::new(conn).list(&access.owner).await
    }

    pub async fn update(&self, access: Access, id: &TagId, changes: TagChanges) -> Result<Tag> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Edit).await?;
        changes.validate()?;

        let repo = LibSqlTagRepository::new(conn);
        let mut tag = repo
            .find(id, &access.owner)
            .await?
            .ok_or_else(|| Error::not_found("Tag", id))?;
        changes.apply_to(&mut tag);
        if !repo.update(&tag).await? {
            return Err(Error::not_found("Tag", id));
        }
        Ok(tag)
    }

    /// Delete a tag and unlink it from every task.
    pub async fn delete(&self, access: Access, id: &TagId) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        authorize_on(conn, access, PermissionLevel::Edit).await?;

        if LibSqlTagRepository::new(conn).delete(id, &access.owner).await? {
            Ok(())
        } else {
            Err(Error::not_found("Tag", id))
        }
    }
}
