//! Permission engine: delegated access checks and the invitation lifecycle.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Duration;
use libsql::Connection;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;

use super::audit::record;
use super::{Access, DatabaseService};
use crate::db::{
    with_transaction, LibSqlPermissionRepository, LibSqlUserRepository, PermissionRepository,
    UserRepository,
};
use crate::error::Error;
use crate::models::{
    AuditAction, InvitationStatus, NewAuditEntry, NewInvitation, Permission, PermissionId,
    PermissionInvitation, PermissionLevel, InvitationId, UserId,
};
use crate::util::{normalize_email, now};
use crate::Result;

/// Invitations expire after this many days unless told otherwise
pub const DEFAULT_INVITATION_TTL_DAYS: i64 = 7;

const TOKEN_BYTES: usize = 32;

/// The authorization gate every service entry point goes through.
///
/// Self-access always passes; otherwise `acting` needs an active grant from
/// `owner` at `required` or above. The caller already holds the database lock.
pub(crate) async fn authorize_on(
    conn: &Connection,
    access: Access,
    required: PermissionLevel,
) -> Result<()> {
    if !access.is_delegated() {
        return Ok(());
    }
    if has_permission(conn, &access.acting, &access.owner, required).await? {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "{required} permission on this user's data is required"
        )))
    }
}

async fn has_permission(
    conn: &Connection,
    assistant_id: &UserId,
    owner_id: &UserId,
    required: PermissionLevel,
) -> Result<bool> {
    Ok(LibSqlPermissionRepository::new(conn)
        .find_active(owner_id, assistant_id)
        .await?
        .is_some_and(|permission| permission.level.satisfies(required)))
}

/// 32 random bytes from the OS CSPRNG, URL-safe base64 without padding
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Outcome of redeeming an invitation inside a transaction. Expiry is
/// reported after commit so the flip to `expired` persists.
enum Redemption<T> {
    Done(T),
    Expired,
}

fn invitation_audit_state(invitation: &PermissionInvitation) -> serde_json::Value {
    json!({
        "email": invitation.email,
        "level": invitation.level,
        "status": invitation.status,
        "expiresAt": invitation.expires_at,
    })
}

#[derive(Clone)]
pub struct PermissionService {
    db: DatabaseService,
}

impl PermissionService {
    #[must_use]
    pub const fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    /// Whether `assistant_id` holds an active grant from `owner_id` at `required` or above.
    pub async fn check_permission(
        &self,
        assistant_id: &UserId,
        owner_id: &UserId,
        required: PermissionLevel,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        has_permission(db.connection(), assistant_id, owner_id, required).await
    }

    /// Fail with `Forbidden` unless `access` is self-access or sufficiently delegated.
    pub async fn authorize(&self, access: Access, required: PermissionLevel) -> Result<()> {
        let db = self.db.lock().await;
        authorize_on(db.connection(), access, required).await
    }

    /// Level of the active grant for the pair, if any.
    pub async fn get_permission_level(
        &self,
        assistant_id: &UserId,
        owner_id: &UserId,
    ) -> Result<Option<PermissionLevel>> {
        let db = self.db.lock().await;
        Ok(LibSqlPermissionRepository::new(db.connection())
            .find_active(owner_id, assistant_id)
            .await?
            .map(|permission| permission.level))
    }

    /// Invite `input.assistant_email` to act on `owner_id`'s data.
    pub async fn create_invitation(
        &self,
        owner_id: &UserId,
        input: NewInvitation,
    ) -> Result<PermissionInvitation> {
        let email = normalize_email(&input.assistant_email);
        if email.is_empty() || !email.contains('@') {
            return Err(Error::InvalidInput(format!(
                "Invalid assistant email: {email}"
            )));
        }

        let created_at = now();
        let expires_at = input
            .expires_at
            .unwrap_or_else(|| created_at + Duration::days(DEFAULT_INVITATION_TTL_DAYS));
        if expires_at <= created_at {
            return Err(Error::InvalidInput(
                "Invitation expiry must be in the future".into(),
            ));
        }

        let db = self.db.lock().await;
        let conn = db.connection();
        let owner = LibSqlUserRepository::new(conn)
            .find(owner_id)
            .await?
            .ok_or_else(|| Error::not_found("User", owner_id))?;
        if owner.email == email {
            return Err(Error::InvalidInput("You cannot invite yourself".into()));
        }

        with_transaction(conn, async {
            let repo = LibSqlPermissionRepository::new(conn);
            for pending in repo.find_pending_invitations(owner_id, &email).await? {
                if pending.is_past_expiry(created_at) {
                    repo.resolve_invitation(&pending.id, InvitationStatus::Expired, created_at)
                        .await?;
                } else {
                    return Err(Error::Conflict(format!(
                        "A pending invitation for {email} already exists"
                    )));
                }
            }

            let invitation = PermissionInvitation {
                id: InvitationId::new(),
                owner_id: *owner_id,
                email: email.clone(),
                level: input.level,
                token: generate_token(),
                status: InvitationStatus::Pending,
                expires_at,
                created_at,
                updated_at: created_at,
            };
            repo.insert_invitation(&invitation).await?;

            record(
                conn,
                NewAuditEntry::new(*owner_id, AuditAction::InvitationSend, "invitation", invitation.id)
                    .with_new(&invitation_audit_state(&invitation)),
            )
            .await?;

            tracing::info!(invitation = %invitation.id, level = %invitation.level, "Created invitation");
            Ok(invitation)
        })
        .await
    }

    /// Redeem an invitation token, granting the invited level to `assistant_id`.
    pub async fn accept_invitation(&self, assistant_id: &UserId, token: &str) -> Result<Permission> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let redemption = with_transaction(conn, async {
            let repo = LibSqlPermissionRepository::new(conn);
            let at = now();
            let mut invitation = Self::open_invitation(&repo, token).await?;
            if invitation.is_past_expiry(at) {
                repo.resolve_invitation(&invitation.id, InvitationStatus::Expired, at)
                    .await?;
                return Ok(Redemption::Expired);
            }
            if invitation.owner_id == *assistant_id {
                return Err(Error::InvalidInput(
                    "You cannot accept your own invitation".into(),
                ));
            }
            if !repo
                .resolve_invitation(&invitation.id, InvitationStatus::Accepted, at)
                .await?
            {
                return Err(Error::InvalidState("Invitation is no longer pending".into()));
            }
            invitation.status = InvitationStatus::Accepted;
            invitation.updated_at = at;

            let replaced = repo
                .deactivate_pair(&invitation.owner_id, assistant_id, at)
                .await?;
            if replaced > 0 {
                tracing::debug!("Deactivated {replaced} previous grant(s) for the pair");
            }

            let permission = Permission {
                id: PermissionId::new(),
                owner_id: invitation.owner_id,
                assistant_id: *assistant_id,
                level: invitation.level,
                is_active: true,
                created_at: at,
                updated_at: at,
            };
            repo.insert_permission(&permission).await?;

            record(
                conn,
                NewAuditEntry::new(*assistant_id, AuditAction::InvitationAccept, "invitation", invitation.id)
                    .targeting(invitation.owner_id)
                    .with_previous(&json!({ "status": InvitationStatus::Pending }))
                    .with_new(&json!({
                        "status": invitation.status,
                        "permissionId": permission.id,
                        "level": permission.level,
                    })),
            )
            .await?;

            Ok(Redemption::Done(permission))
        })
        .await?;

        match redemption {
            Redemption::Done(permission) => {
                tracing::info!(permission = %permission.id, level = %permission.level, "Accepted invitation");
                Ok(permission)
            }
            Redemption::Expired => Err(Error::Expired("Invitation has expired".into())),
        }
    }

    /// Decline a pending invitation.
    pub async fn decline_invitation(
        &self,
        user_id: &UserId,
        token: &str,
    ) -> Result<PermissionInvitation> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let redemption = with_transaction(conn, async {
            let repo = LibSqlPermissionRepository::new(conn);
            let at = now();
            let mut invitation = Self::open_invitation(&repo, token).await?;
            if invitation.is_past_expiry(at) {
                repo.resolve_invitation(&invitation.id, InvitationStatus::Expired, at)
                    .await?;
                return Ok(Redemption::Expired);
            }
            if !repo
                .resolve_invitation(&invitation.id, InvitationStatus::Declined, at)
                .await?
            {
                return Err(Error::InvalidState("Invitation is no longer pending".into()));
            }
            invitation.status = InvitationStatus::Declined;
            invitation.updated_at = at;

            record(
                conn,
                NewAuditEntry::new(*user_id, AuditAction::InvitationDecline, "invitation", invitation.id)
                    .on_behalf_of(invitation.owner_id)
                    .with_previous(&json!({ "status": InvitationStatus::Pending }))
                    .with_new(&json!({ "status": invitation.status })),
            )
            .await?;

            Ok(Redemption::Done(invitation))
        })
        .await?;

        match redemption {
            Redemption::Done(invitation) => Ok(invitation),
            Redemption::Expired => Err(Error::Expired("Invitation has expired".into())),
        }
    }

    /// Look up a token and require it to still be pending.
    async fn open_invitation(
        repo: &LibSqlPermissionRepository<'_>,
        token: &str,
    ) -> Result<PermissionInvitation> {
        let invitation = repo
            .find_invitation_by_token(token.trim())
            .await?
            .ok_or_else(|| Error::NotFound("Invitation not found".into()))?;
        if invitation.status != InvitationStatus::Pending {
            return Err(Error::InvalidState(format!(
                "Invitation is already {}",
                invitation.status.as_str()
            )));
        }
        Ok(invitation)
    }

    /// Pending invitations addressed to `email`, newest first.
    ///
    /// Invitations found past their expiry are marked expired and left out.
    pub async fn find_pending_invitations(&self, email: &str) -> Result<Vec<PermissionInvitation>> {
        let email = normalize_email(email);
        let db = self.db.lock().await;
        let conn = db.connection();

        with_transaction(conn, async {
            let repo = LibSqlPermissionRepository::new(conn);
            let at = now();
            let mut open = Vec::new();
            for invitation in repo.list_pending_for_email(&email).await? {
                if invitation.is_past_expiry(at) {
                    repo.resolve_invitation(&invitation.id, InvitationStatus::Expired, at)
                        .await?;
                } else {
                    open.push(invitation);
                }
            }
            Ok(open)
        })
        .await
    }

    /// Revoke a grant. Either party may revoke; the row is kept inactive.
    pub async fn revoke_permission(
        &self,
        acting_user_id: &UserId,
        permission_id: &PermissionId,
    ) -> Result<Permission> {
        let db = self.db.lock().await;
        let conn = db.connection();

        with_transaction(conn, async {
            let repo = LibSqlPermissionRepository::new(conn);
            let mut permission = repo
                .find_permission(permission_id)
                .await?
                .ok_or_else(|| Error::not_found("Permission", permission_id))?;

            let other_party = if permission.owner_id == *acting_user_id {
                permission.assistant_id
            } else if permission.assistant_id == *acting_user_id {
                permission.owner_id
            } else {
                return Err(Error::Forbidden(
                    "Only the owner or the assistant may revoke this permission".into(),
                ));
            };
            if !permission.is_active {
                return Err(Error::InvalidState("Permission is already revoked".into()));
            }

            permission.is_active = false;
            permission.updated_at = now();
            repo.save_permission(&permission).await?;

            record(
                conn,
                NewAuditEntry::new(*acting_user_id, AuditAction::PermissionRevoke, "permission", permission.id)
                    .targeting(other_party)
                    .with_previous(&json!({ "level": permission.level, "isActive": true }))
                    .with_new(&json!({ "level": permission.level, "isActive": false })),
            )
            .await?;

            tracing::info!(permission = %permission.id, "Revoked permission");
            Ok(permission)
        })
        .await
    }

    /// Change the level of an active grant. Only the owner may do this.
    pub async fn update_permission(
        &self,
        owner_id: &UserId,
        permission_id: &PermissionId,
        level: PermissionLevel,
    ) -> Result<Permission> {
        let db = self.db.lock().await;
        let conn = db.connection();

        with_transaction(conn, async {
            let repo = LibSqlPermissionRepository::new(conn);
            let mut permission = repo
                .find_permission(permission_id)
                .await?
                .filter(|permission| permission.owner_id == *owner_id)
                .ok_or_else(|| Error::not_found("Permission", permission_id))?;
            if !permission.is_active {
                return Err(Error::InvalidState("Permission has been revoked".into()));
            }

            let previous = permission.level;
            permission.level = level;
            permission.updated_at = now();
            repo.save_permission(&permission).await?;

            record(
                conn,
                NewAuditEntry::new(*owner_id, AuditAction::PermissionUpdate, "permission", permission.id)
                    .targeting(permission.assistant_id)
                    .with_previous(&json!({ "level": previous }))
                    .with_new(&json!({ "level": level })),
            )
            .await?;

            Ok(permission)
        })
        .await
    }

    /// Active grants `owner_id` has given, newest first.
    pub async fn find_assistants(&self, owner_id: &UserId) -> Result<Vec<Permission>> {
        let db = self.db.lock().await;
        LibSqlPermissionRepository::new(db.connection())
            .list_by_owner(owner_id)
            .await
    }

    /// Active grants `assistant_id` holds, newest first.
    pub async fn find_delegators(&self, assistant_id: &UserId) -> Result<Vec<Permission>> {
        let db = self.db.lock().await;
        LibSqlPermissionRepository::new(db.connection())
            .list_by_assistant(assistant_id)
            .await
    }
}
