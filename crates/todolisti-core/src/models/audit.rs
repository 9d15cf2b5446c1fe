//! Audit log entries for security-relevant mutations

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AuditLogId, UserId};
use crate::error::Error;

/// Default page size for audit queries
pub const DEFAULT_AUDIT_LIMIT: u32 = 50;

/// Kind of mutation recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "task.create")]
    TaskCreate,
    #[serde(rename = "task.update")]
    TaskUpdate,
    #[serde(rename = "task.delete")]
    TaskDelete,
    #[serde(rename = "task.complete")]
    TaskComplete,
    #[serde(rename = "task.uncomplete")]
    TaskUncomplete,
    #[serde(rename = "project.create")]
    ProjectCreate,
    #[serde(rename = "project.update")]
    ProjectUpdate,
    #[serde(rename = "project.delete")]
    ProjectDelete,
    #[serde(rename = "project.archive")]
    ProjectArchive,
    #[serde(rename = "permission.grant")]
    PermissionGrant,
    #[serde(rename = "permission.revoke")]
    PermissionRevoke,
    #[serde(rename = "permission.update")]
    PermissionUpdate,
    #[serde(rename = "invitation.send")]
    InvitationSend,
    #[serde(rename = "invitation.accept")]
    InvitationAccept,
    #[serde(rename = "invitation.decline")]
    InvitationDecline,
}

impl AuditAction {
    pub const ALL: [Self; 15] = [
        Self::TaskCreate,
        Self::TaskUpdate,
        Self::TaskDelete,
        Self::TaskComplete,
        Self::TaskUncomplete,
        Self::ProjectCreate,
        Self::ProjectUpdate,
        Self::ProjectDelete,
        Self::ProjectArchive,
        Self::PermissionGrant,
        Self::PermissionRevoke,
        Self::PermissionUpdate,
        Self::InvitationSend,
        Self::InvitationAccept,
        Self::InvitationDecline,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreate => "task.create",
            Self::TaskUpdate => "task.update",
            Self::TaskDelete => "task.delete",
            Self::TaskComplete => "task.complete",
            Self::TaskUncomplete => "task.uncomplete",
            Self::ProjectCreate => "project.create",
            Self::ProjectUpdate => "project.update",
            Self::ProjectDelete => "project.delete",
            Self::ProjectArchive => "project.archive",
            Self::PermissionGrant => "permission.grant",
            Self::PermissionRevoke => "permission.revoke",
            Self::PermissionUpdate => "permission.update",
            Self::InvitationSend => "invitation.send",
            Self::InvitationAccept => "invitation.accept",
            Self::InvitationDecline => "invitation.decline",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown audit action: {s}")))
    }
}

/// Request context attached to an audit entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// An append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: AuditLogId,
    /// Acting user
    pub user_id: UserId,
    /// Owner acted upon, when the action was delegated
    pub target_user_id: Option<UserId>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub metadata: Option<AuditMetadata>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording an audit entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub user_id: UserId,
    pub target_user_id: Option<UserId>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub metadata: Option<AuditMetadata>,
}

impl NewAuditEntry {
    #[must_use]
    pub fn new(
        user_id: UserId,
        action: AuditAction,
        entity_type: &str,
        entity_id: impl fmt::Display,
    ) -> Self {
        Self {
            user_id,
            target_user_id: None,
            action,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            previous_state: None,
            new_state: None,
            metadata: None,
        }
    }

    /// Record `owner` as the target when it differs from the acting user
    #[must_use]
    pub fn on_behalf_of(mut self, owner: UserId) -> Self {
        self.target_user_id = (owner != self.user_id).then_some(owner);
        self
    }

    /// Record an explicit target user
    #[must_use]
    pub const fn targeting(mut self, target: UserId) -> Self {
        self.target_user_id = Some(target);
        self
    }

    /// Attach the entity state before the change
    #[must_use]
    pub fn with_previous<T: Serialize>(mut self, value: &T) -> Self {
        self.previous_state = serde_json::to_value(value).ok();
        self
    }

    /// Attach the entity state after the change
    #[must_use]
    pub fn with_new<T: Serialize>(mut self, value: &T) -> Self {
        self.new_state = serde_json::to_value(value).ok();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: AuditMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Paging and time window for audit lookups
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl AuditQuery {
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_AUDIT_LIMIT)
    }

    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

/// Count of entries per action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStat {
    pub action: AuditAction,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_round_trip_through_str() {
        for action in AuditAction::ALL {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
        assert!("task.archive".parse::<AuditAction>().is_err());
    }

    #[test]
    fn test_action_serializes_dotted() {
        assert_eq!(
            serde_json::to_string(&AuditAction::InvitationAccept).unwrap(),
            "\"invitation.accept\""
        );
    }

    #[test]
    fn test_delegated_entry_records_target() {
        let assistant = UserId::new();
        let owner = UserId::new();
        let entry = NewAuditEntry::new(assistant, AuditAction::TaskUpdate, "task", "t1")
            .on_behalf_of(owner);
        assert_eq!(entry.target_user_id, Some(owner));

        let own = NewAuditEntry::new(owner, AuditAction::TaskUpdate, "task", "t1")
            .on_behalf_of(owner);
        assert_eq!(own.target_user_id, None);
    }

    #[test]
    fn test_query_defaults() {
        let query = AuditQuery::default();
        assert_eq!(query.limit(), 50);
        assert_eq!(query.offset(), 0);
    }
}
