//! Permission grant and invitation repository implementation

use chrono::{DateTime, Utc};
use libsql::{Connection, Row, Value};

use super::values::{flag, millis, parse_enum, parse_id, text};
use crate::error::Result;
use crate::models::{
    InvitationId, InvitationStatus, Permission, PermissionId, PermissionInvitation,
    PermissionLevel, UserId,
};
use crate::util::from_millis;

const PERMISSION_SELECT: &str =
    "SELECT id, owner_id, assistant_id, level, is_active, created_at, updated_at FROM permissions";

const INVITATION_SELECT: &str = "SELECT id, owner_id, email, level, token, status, expires_at,
        created_at, updated_at
    FROM permission_invitations";

/// Trait for permission and invitation storage operations (async)
#[allow(async_fn_in_trait)]
pub trait PermissionRepository {
    async fn insert_permission(&self, permission: &Permission) -> Result<()>;

    async fn find_permission(&self, id: &PermissionId) -> Result<Option<Permission>>;

    /// The active grant for an (owner, assistant) pair, if any
    async fn find_active(&self, owner_id: &UserId, assistant_id: &UserId)
        -> Result<Option<Permission>>;

    /// Deactivate every active grant for a pair; returns how many were revoked
    async fn deactivate_pair(
        &self,
        owner_id: &UserId,
        assistant_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Persist level and activity of an existing grant
    async fn save_permission(&self, permission: &Permission) -> Result<()>;

    /// Active grants given by `owner_id`, newest first
    async fn list_by_owner(&self, owner_id: &UserId) -> Result<Vec<Permission>>;

    /// Active grants held by `assistant_id`, newest first
    async fn list_by_assistant(&self, assistant_id: &UserId) -> Result<Vec<Permission>>;

    async fn insert_invitation(&self, invitation: &PermissionInvitation) -> Result<()>;

    async fn find_invitation_by_token(&self, token: &str)
        -> Result<Option<PermissionInvitation>>;

    /// Pending invitations from `owner_id` to `email`, newest first
    async fn find_pending_invitations(
        &self,
        owner_id: &UserId,
        email: &str,
    ) -> Result<Vec<PermissionInvitation>>;

    /// Pending invitations addressed to `email`, newest first
    async fn list_pending_for_email(&self, email: &str) -> Result<Vec<PermissionInvitation>>;

    /// Move a pending invitation to `status`. Returns `false` if it was no longer pending.
    async fn resolve_invitation(
        &self,
        id: &InvitationId,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// libSQL implementation of `PermissionRepository`
pub struct LibSqlPermissionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlPermissionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_permission(row: &Row) -> Result<Permission> {
        Ok(Permission {
            id: parse_id(&row.get::<String>(0)?, "permissions.id")?,
            owner_id: parse_id(&row.get::<String>(1)?, "permissions.owner_id")?,
            assistant_id: parse_id(&row.get::<String>(2)?, "permissions.assistant_id")?,
            level: parse_enum(&row.get::<String>(3)?, "permissions.level")?,
            is_active: row.get::<i64>(4)? != 0,
            created_at: from_millis(row.get(5)?),
            updated_at: from_millis(row.get(6)?),
        })
    }

    fn parse_invitation(row: &Row) -> Result<PermissionInvitation> {
        Ok(PermissionInvitation {
            id: parse_id(&row.get::<String>(0)?, "permission_invitations.id")?,
            owner_id: parse_id(&row.get::<String>(1)?, "permission_invitations.owner_id")?,
            email: row.get(2)?,
            level: parse_enum(&row.get::<String>(3)?, "permission_invitations.level")?,
            token: row.get(4)?,
            status: parse_enum(&row.get::<String>(5)?, "permission_invitations.status")?,
            expires_at: from_millis(row.get(6)?),
            created_at: from_millis(row.get(7)?),
            updated_at: from_millis(row.get(8)?),
        })
    }

    async fn query_permissions(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Permission>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut permissions = Vec::new();
        while let Some(row) = rows.next().await? {
            permissions.push(Self::parse_permission(&row)?);
        }
        Ok(permissions)
    }

    async fn query_invitations(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<PermissionInvitation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut invitations = Vec::new();
        while let Some(row) = rows.next().await? {
            invitations.push(Self::parse_invitation(&row)?);
        }
        Ok(invitations)
    }
}

fn level_value(level: PermissionLevel) -> Value {
    text(level.as_str())
}

impl PermissionRepository for LibSqlPermissionRepository<'_> {
    async fn insert_permission(&self, permission: &Permission) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO permissions (id, owner_id, assistant_id, level, is_active, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(permission.id.as_str()),
                    text(permission.owner_id.as_str()),
                    text(permission.assistant_id.as_str()),
                    level_value(permission.level),
                    flag(permission.is_active),
                    millis(&permission.created_at),
                    millis(&permission.updated_at),
                ],
            )
            .await?;
        Ok(())
    }

    async fn find_permission(&self, id: &PermissionId) -> Result<Option<Permission>> {
        Ok(self
            .query_permissions(
                &format!("{PERMISSION_SELECT} WHERE id = ?"),
                vec![text(id.as_str())],
            )
            .await?
            .into_iter()
            .next())
    }

    async fn find_active(
        &self,
        owner_id: &UserId,
        assistant_id: &UserId,
    ) -> Result<Option<Permission>> {
        Ok(self
            .query_permissions(
                &format!(
                    "{PERMISSION_SELECT} WHERE owner_id = ? AND assistant_id = ? AND is_active = 1"
                ),
                vec![text(owner_id.as_str()), text(assistant_id.as_str())],
            )
            .await?
            .into_iter()
            .next())
    }

    async fn deactivate_pair(
        &self,
        owner_id: &UserId,
        assistant_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "UPDATE permissions SET is_active = 0, updated_at = ?
                 WHERE owner_id = ? AND assistant_id = ? AND is_active = 1",
                vec![
                    millis(&now),
                    text(owner_id.as_str()),
                    text(assistant_id.as_str()),
                ],
            )
            .await?)
    }

    async fn save_permission(&self, permission: &Permission) -> Result<()> {
        self.conn
            .execute(
                "UPDATE permissions SET level = ?, is_active = ?, updated_at = ? WHERE id = ?",
                vec![
                    level_value(permission.level),
                    flag(permission.is_active),
                    millis(&permission.updated_at),
                    text(permission.id.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_by_owner(&self, owner_id: &UserId) -> Result<Vec<Permission>> {
        self.query_permissions(
            &format!(
                "{PERMISSION_SELECT} WHERE owner_id = ? AND is_active = 1 ORDER BY created_at DESC, id DESC"
            ),
            vec![text(owner_id.as_str())],
        )
        .await
    }

    async fn list_by_assistant(&self, assistant_id: &UserId) -> Result<Vec<Permission>> {
        self.query_permissions(
            &format!(
                "{PERMISSION_SELECT} WHERE assistant_id = ? AND is_active = 1 ORDER BY created_at DESC, id DESC"
            ),
            vec![text(assistant_id.as_str())],
        )
        .await
    }

    async fn insert_invitation(&self, invitation: &PermissionInvitation) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO permission_invitations (id, owner_id, email, level, token, status,
                    expires_at, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(invitation.id.as_str()),
                    text(invitation.owner_id.as_str()),
                    text(invitation.email.as_str()),
                    level_value(invitation.level),
                    text(invitation.token.as_str()),
                    text(invitation.status.as_str()),
                    millis(&invitation.expires_at),
                    millis(&invitation.created_at),
                    millis(&invitation.updated_at),
                ],
            )
            .await?;
        Ok(())
    }

    async fn find_invitation_by_token(
        &self,
        token: &str,
    ) -> Result<Option<PermissionInvitation>> {
        Ok(self
            .query_invitations(
                &format!("{INVITATION_SELECT} WHERE token = ?"),
                vec![text(token)],
            )
            .await?
            .into_iter()
            .next())
    }

    async fn find_pending_invitations(
        &self,
        owner_id: &UserId,
        email: &str,
    ) -> Result<Vec<PermissionInvitation>> {
        self.query_invitations(
            &format!(
                "{INVITATION_SELECT} WHERE owner_id = ? AND email = ? AND status = 'pending'
                 ORDER BY created_at DESC, id DESC"
            ),
            vec![text(owner_id.as_str()), text(email)],
        )
        .await
    }

    async fn list_pending_for_email(&self, email: &str) -> Result<Vec<PermissionInvitation>> {
        self.query_invitations(
            &format!(
                "{INVITATION_SELECT} WHERE email = ? AND status = 'pending'
                 ORDER BY created_at DESC, id DESC"
            ),
            vec![text(email)],
        )
        .await
    }

    async fn resolve_invitation(
        &self,
        id: &InvitationId,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "UPDATE permission_invitations SET status = ?, updated_at = ?
                 WHERE id = ? AND status = 'pending'",
                vec![text(status.as_str()), millis(&now), text(id.as_str())],
            )
            .await?;
        Ok(affected == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::insert_user;
    use crate::db::Database;
    use crate::util::now;

    fn grant(owner_id: UserId, assistant_id: UserId, level: PermissionLevel) -> Permission {
        let at = now();
        Permission {
            id: PermissionId::new(),
            owner_id,
            assistant_id,
            level,
            is_active: true,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deactivate_pair_leaves_history() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let owner = insert_user(conn, "owner@example.com").await;
        let assistant = insert_user(conn, "assistant@example.com").await;
        let repo = LibSqlPermissionRepository::new(conn);

        let first = grant(owner, assistant, PermissionLevel::View);
        repo.insert_permission(&first).await.unwrap();
        assert_eq!(repo.deactivate_pair(&owner, &assistant, now()).await.unwrap(), 1);
        assert!(repo.find_active(&owner, &assistant).await.unwrap().is_none());

        let second = grant(owner, assistant, PermissionLevel::Full);
        repo.insert_permission(&second).await.unwrap();
        let active = repo.find_active(&owner, &assistant).await.unwrap().unwrap();
        assert_eq!(active.level, PermissionLevel::Full);

        let stored_first = repo.find_permission(&first.id).await.unwrap().unwrap();
        assert!(!stored_first.is_active);
        assert_eq!(repo.list_by_owner(&owner).await.unwrap().len(), 1);
        assert_eq!(repo.list_by_assistant(&assistant).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolve_invitation_only_from_pending() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let owner = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlPermissionRepository::new(conn);

        let at = now();
        let invitation = PermissionInvitation {
            id: InvitationId::new(),
            owner_id: owner,
            email: "pa@example.com".into(),
            level: PermissionLevel::Edit,
            token: "token-1".into(),
            status: InvitationStatus::Pending,
            expires_at: at + chrono::Duration::days(7),
            created_at: at,
            updated_at: at,
        };
        repo.insert_invitation(&invitation).await.unwrap();
        assert_eq!(repo.list_pending_for_email("pa@example.com").await.unwrap().len(), 1);

        assert!(repo
            .resolve_invitation(&invitation.id, InvitationStatus::Declined, now())
            .await
            .unwrap());
        assert!(!repo
            .resolve_invitation(&invitation.id, InvitationStatus::Accepted, now())
            .await
            .unwrap());

        let stored = repo.find_invitation_by_token("token-1").await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Declined);
        assert!(repo
            .find_pending_invitations(&owner, "pa@example.com")
            .await
            .unwrap()
            .is_empty());
    }
}
