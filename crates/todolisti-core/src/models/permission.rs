//! Delegated access: permission grants and invitations

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InvitationId, PermissionId, UserId};
use crate::error::Error;

/// Capability level granted to an assistant. `Full` ⊇ `Edit` ⊇ `View`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    /// Can view tasks
    View,
    /// Can view and edit tasks
    Edit,
    /// Full control including delete
    Full,
}

impl PermissionLevel {
    /// Ordinal rank: view 1, edit 2, full 3
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::View => 1,
            Self::Edit => 2,
            Self::Full => 3,
        }
    }

    /// Whether a grant at this level covers an operation requiring `required`
    #[must_use]
    pub const fn satisfies(self, required: Self) -> bool {
        self.rank() >= required.rank()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Self::View),
            "edit" => Ok(Self::Edit),
            "full" => Ok(Self::Full),
            other => Err(Error::InvalidInput(format!(
                "unknown permission level: {other}"
            ))),
        }
    }
}

/// Invitation lifecycle. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl InvitationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for InvitationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "expired" => Ok(Self::Expired),
            other => Err(Error::InvalidInput(format!(
                "unknown invitation status: {other}"
            ))),
        }
    }
}

/// Directional grant: `assistant_id` may act on `owner_id`'s entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: PermissionId,
    pub owner_id: UserId,
    pub assistant_id: UserId,
    pub level: PermissionLevel,
    /// Revoked grants stay in the table with `is_active = false`
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Invitation for an assistant, redeemed with its token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionInvitation {
    pub id: InvitationId,
    pub owner_id: UserId,
    /// Invitee email, normalized to lowercase
    pub email: String,
    pub level: PermissionLevel,
    pub token: String,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PermissionInvitation {
    /// Whether the invitation's natural expiry has passed
    #[must_use]
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Input for inviting an assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvitation {
    pub assistant_email: String,
    pub level: PermissionLevel,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
