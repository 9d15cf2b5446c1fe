//! Offline sync wire types and the durable retry queue model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Project, SyncQueueId, Task, UserId};
use crate::error::Error;

/// Mutation kind carried by a sync item or queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown sync operation: {other}"))),
        }
    }
}

/// Versioned entity kinds that take part in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Task,
    Project,
}

impl EntityType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "project" => Ok(Self::Project),
            other => Err(Error::InvalidInput(format!("unknown entity type: {other}"))),
        }
    }
}

/// A client's claim about one entity: the version it last saw plus its edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    pub id: String,
    pub sync_version: i64,
    #[serde(default)]
    pub data: serde_json::Value,
    pub operation: SyncOperation,
    #[serde(default)]
    pub client_updated_at: Option<DateTime<Utc>>,
}

/// A rejected client item paired with the authoritative server entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict<T> {
    pub client_version: SyncItem,
    pub server_version: T,
}

/// An item that failed outright (not a version conflict)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItemError {
    pub id: String,
    pub operation: SyncOperation,
    pub message: String,
}

/// Per entity type outcome of a sync batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySyncResult<T> {
    pub synced: Vec<T>,
    pub conflicts: Vec<SyncConflict<T>>,
    pub errors: Vec<SyncItemError>,
}

impl<T> Default for EntitySyncResult<T> {
    fn default() -> Self {
        Self {
            synced: Vec::new(),
            conflicts: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Result of reconciling a single item
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome<T> {
    /// Applied (or already applied). Deletes carry no entity.
    Synced(Option<T>),
    /// Version mismatch; carries the current server entity
    Conflict(T),
}

/// Batch of offline edits sent by a client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub tasks: Vec<SyncItem>,
    #[serde(default)]
    pub projects: Vec<SyncItem>,
    /// Accepted for compatibility with older clients; not used by the reconciler
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub tasks: EntitySyncResult<Task>,
    pub projects: EntitySyncResult<Project>,
    pub server_timestamp: DateTime<Utc>,
}

/// Catch-up payload: everything touched after a timestamp, tombstones included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    pub tasks: Vec<Task>,
    pub projects: Vec<Project>,
    pub server_timestamp: DateTime<Utc>,
}

/// Lifecycle of a durable queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Conflict,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::InvalidInput(format!("unknown sync status: {other}"))),
        }
    }
}

/// Version details recorded when a queued operation hits a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    pub server_version: i64,
    pub client_version: i64,
    pub server_state: serde_json::Value,
}

/// A queued offline operation that must survive restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: SyncQueueId,
    pub user_id: UserId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: SyncOperation,
    /// `{ "syncVersion": n, "data": {...} }`
    pub payload: serde_json::Value,
    pub client_timestamp: DateTime<Utc>,
    pub status: SyncStatus,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub conflict_data: Option<ConflictData>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SyncQueueItem {
    /// Interpret the payload as a sync item for the reconciler
    pub fn to_sync_item(&self) -> Result<SyncItem, Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct QueuedPayload {
            #[serde(default)]
            sync_version: i64,
            #[serde(default)]
            data: serde_json::Value,
        }

        let payload: QueuedPayload = serde_json::from_value(self.payload.clone())?;
        Ok(SyncItem {
            id: self.entity_id.clone(),
            sync_version: payload.sync_version,
            data: payload.data,
            operation: self.operation,
            client_updated_at: Some(self.client_timestamp),
        })
    }
}

/// Input for enqueueing an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSyncQueueItem {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: SyncOperation,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub client_timestamp: Option<DateTime<Utc>>,
}

/// What happened to one queue entry during processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProcessOutcome {
    pub id: SyncQueueId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub status: SyncStatus,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_item_parses_client_payload() {
        let item: SyncItem = serde_json::from_str(
            r#"{"id":"0190a3f4-0000-7000-8000-000000000001","syncVersion":2,
                "operation":"update","data":{"title":"x"},
                "clientUpdatedAt":"2024-01-15T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(item.operation, SyncOperation::Update);
        assert_eq!(item.sync_version, 2);
        assert!(item.client_updated_at.is_some());
    }

    #[test]
    fn test_sync_request_defaults_to_empty_batches() {
        let request: SyncRequest = serde_json::from_str("{}").unwrap();
        assert!(request.tasks.is_empty());
        assert!(request.projects.is_empty());
        assert!(request.last_sync_at.is_none());
    }

    #[test]
    fn test_unknown_operation_is_rejected() {
        assert!(serde_json::from_str::<SyncOperation>("\"upsert\"").is_err());
        assert!("merge".parse::<SyncOperation>().is_err());
    }

    #[test]
    fn test_queue_payload_becomes_sync_item() {
        let item = SyncQueueItem {
            id: SyncQueueId::new(),
            user_id: UserId::new(),
            entity_type: EntityType::Task,
            entity_id: "abc".into(),
            operation: SyncOperation::Update,
            payload: serde_json::json!({"syncVersion": 3, "data": {"title": "t"}}),
            client_timestamp: crate::util::now(),
            status: SyncStatus::Pending,
            retry_count: 0,
            error_message: None,
            conflict_data: None,
            processed_at: None,
            created_at: crate::util::now(),
        };
        let sync_item = item.to_sync_item().unwrap();
        assert_eq!(sync_item.id, "abc");
        assert_eq!(sync_item.sync_version, 3);
        assert_eq!(sync_item.data["title"], "t");
    }
}
