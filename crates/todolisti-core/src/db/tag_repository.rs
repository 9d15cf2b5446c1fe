//! Tag repository implementation

use libsql::{Connection, Row};

use super::values::{millis, parse_id, text};
use crate::error::{Error, Result};
use crate::models::{Tag, TagId, UserId};
use crate::util::from_millis;

const TAG_SELECT: &str = "SELECT id, user_id, name, color, created_at FROM tags";

/// Trait for tag storage operations (async)
#[allow(async_fn_in_trait)]
pub trait TagRepository {
    /// Insert a new tag. Fails with `Conflict` when the owner already has the name.
    async fn insert(&self, tag: &Tag) -> Result<()>;

    /// Get a tag owned by `user_id`
    async fn find(&self, id: &TagId, user_id: &UserId) -> Result<Option<Tag>>;

    /// List a user's tags by name
    async fn list(&self, user_id: &UserId) -> Result<Vec<Tag>>;

    /// Save name and color of an existing tag
    async fn update(&self, tag: &Tag) -> Result<bool>;

    /// Hard-delete a tag and its task links
    async fn delete(&self, id: &TagId, user_id: &UserId) -> Result<bool>;

    /// How many of `ids` belong to `user_id`
    async fn count_owned(&self, user_id: &UserId, ids: &[TagId]) -> Result<usize>;
}

/// libSQL implementation of `TagRepository`
pub struct LibSqlTagRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlTagRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_tag(row: &Row) -> Result<Tag> {
        Ok(Tag {
            id: parse_id(&row.get::<String>(0)?, "tags.id")?,
            user_id: parse_id(&row.get::<String>(1)?, "tags.user_id")?,
            name: row.get(2)?,
            color: row.get(3)?,
            created_at: from_millis(row.get(4)?),
        })
    }

    async fn name_taken(&self, tag: &Tag) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM tags WHERE user_id = ? AND name = ? AND id != ?)",
                libsql::params![tag.user_id.as_str(), tag.name.as_str(), tag.id.as_str()],
            )
            .await?;
        Ok(rows
            .next()
            .await?
            .map(|row| row.get::<i64>(0))
            .transpose()?
            .is_some_and(|exists| exists != 0))
    }
}

impl TagRepository for LibSqlTagRepository<'_> {
    async fn insert(&self, tag: &Tag) -> Result<()> {
        if self.name_taken(tag).await? {
            return Err(Error::Conflict(format!("Tag '{}' already exists", tag.name)));
        }
        self.conn
            .execute(
                "INSERT INTO tags (id, user_id, name, color, created_at) VALUES (?, ?, ?, ?, ?)",
                vec![
                    text(tag.id.as_str()),
                    text(tag.user_id.as_str()),
                    text(tag.name.as_str()),
                    text(tag.color.as_str()),
                    millis(&tag.created_at),
                ],
            )
            .await?;
        Ok(())
    }

    async fn find(&self, id: &TagId, user_id: &UserId) -> Result<Option<Tag>> {
        let mut rows = self
            .conn
            .query(
                &format!("{TAG_SELECT} WHERE id = ? AND user_id = ?"),
                libsql::params![id.as_str(), user_id.as_str()],
            )
            .await?;
        rows.next()
            .await?
            .map(|row| Self::parse_tag(&row))
            .transpose()
    }

    async fn list(&self, user_id: &UserId) -> Result<Vec<Tag>> {
        let mut rows = self
            .conn
            .query(
                &format!("{TAG_SELECT} WHERE user_id = ? ORDER BY name ASC"),
                libsql::params![user_id.as_str()],
            )
            .await?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next().await? {
            tags.push(Self::parse_tag(&row)?);
        }
        Ok(tags)
    }

    async fn update(&self, tag: &Tag) -> Result<bool> {
        if self.name_taken(tag).await? {
            return Err(Error::Conflict(format!("Tag '{}' already exists", tag.name)));
        }
        let affected = self
            .conn
            .execute(
                "UPDATE tags SET name = ?, color = ? WHERE id = ? AND user_id = ?",
                libsql::params![
                    tag.name.as_str(),
                    tag.color.as_str(),
                    tag.id.as_str(),
                    tag.user_id.as_str()
                ],
            )
            .await?;
        Ok(affected == 1)
    }

    async fn delete(&self, id: &TagId, user_id: &UserId) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM tags WHERE id = ? AND user_id = ?",
                libsql::params![id.as_str(), user_id.as_str()],
            )
            .await?;
        Ok(affected == 1)
    }

    async fn count_owned(&self, user_id: &UserId, ids: &[TagId]) -> Result<usize> {
        let mut owned = 0;
        for id in ids {
            if self.find(id, user_id).await?.is_some() {
                owned += 1;
            }
        }
        Ok(owned)
    }
}
