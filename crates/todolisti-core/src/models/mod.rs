//! Data models for TodoListi

mod audit;
mod id;
mod permission;
mod project;
mod sync;
mod tag;
mod task;
mod user;

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

pub use audit::{
    AuditAction, AuditLog, AuditMetadata, AuditQuery, AuditStat, NewAuditEntry, DEFAULT_AUDIT_LIMIT,
};
pub use id::{
    AuditLogId, InvitationId, PermissionId, ProjectId, SyncQueueId, TagId, TaskId, UserId,
};
pub use permission::{
    InvitationStatus, NewInvitation, Permission, PermissionInvitation, PermissionLevel,
};
pub use project::{NewProject, Project, ProjectChanges};
pub use sync::{
    Changes, ConflictData, EntitySyncResult, EntityType, NewSyncQueueItem, QueueProcessOutcome,
    SyncConflict, SyncItem, SyncItemError, SyncOperation, SyncOutcome, SyncQueueItem, SyncRequest,
    SyncResult, SyncStatus,
};
pub use tag::{NewTag, Tag, TagChanges};
pub use task::{NewTask, Task, TaskChanges, TaskFilter, TaskPriority, TASK_TITLE_MAX_LEN};
pub use user::User;

/// Color assigned to projects and tags created without one
pub const DEFAULT_COLOR: &str = "#6B7280";

static HEX_COLOR: OnceLock<Option<Regex>> = OnceLock::new();

/// Entities that carry an optimistic concurrency counter
pub trait Versioned {
    fn sync_version(&self) -> i64;
}

/// Deserialize a present field (including `null`) as `Some`, so an absent
/// field stays `None` via `#[serde(default)]`
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

pub(crate) fn validate_color(color: &str) -> Result<()> {
    let valid = HEX_COLOR
        .get_or_init(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(color));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "Color must be a hex value like #RRGGBB, got {color}"
        )))
    }
}
