//! Offline sync: version-checked reconciliation of client batches and the
//! durable retry queue.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use libsql::Connection;
use serde::Serialize;

use super::projects::ProjectSyncTarget;
use super::tasks::TaskSyncTarget;
use super::DatabaseService;
use crate::db::{
    with_transaction, LibSqlProjectRepository, LibSqlSyncQueueRepository, LibSqlTaskRepository,
    ProjectRepository, SyncQueueRepository, TaskRepository,
};
use crate::error::Error;
use crate::models::{
    Changes, ConflictData, EntitySyncResult, EntityType, NewSyncQueueItem, ProjectId,
    QueueProcessOutcome, SyncConflict, SyncItem, SyncItemError, SyncOperation, SyncOutcome,
    SyncQueueId, SyncQueueItem, SyncRequest, SyncResult, SyncStatus, TaskId, UserId, Versioned,
};
use crate::util::{compact_text, from_millis, now};
use crate::Result;

/// Storage operations the reconciler needs for one entity type.
///
/// Implementations work on an already locked connection; the reconciler
/// wraps each item in a transaction.
#[allow(async_fn_in_trait)]
pub trait SyncTarget {
    type Entity: Versioned + Clone + Serialize;
    type Id: FromStr + Display + Copy;

    const ENTITY_TYPE: EntityType;

    /// Live row owned by `user_id`
    async fn find_live(&self, id: &Self::Id, user_id: &UserId) -> Result<Option<Self::Entity>>;

    /// Row owned by `user_id`, tombstones included
    async fn find_current(&self, id: &Self::Id, user_id: &UserId) -> Result<Option<Self::Entity>>;

    /// Whether any row, of any owner and in any state, uses `id`
    async fn id_taken(&self, id: &Self::Id) -> Result<bool>;

    /// Insert a new entity at version 1 built from client data
    async fn create(
        &self,
        id: Self::Id,
        user_id: UserId,
        data: &serde_json::Value,
    ) -> Result<Self::Entity>;

    /// Apply client data as a conditional write. `None` when the version moved.
    async fn update(
        &self,
        existing: &Self::Entity,
        data: &serde_json::Value,
    ) -> Result<Option<Self::Entity>>;

    /// Tombstone as a conditional write. `false` when the version moved.
    async fn delete(&self, existing: &Self::Entity) -> Result<bool>;
}

/// Reconcile one client item inside its own transaction.
pub(crate) async fn reconcile_item<T: SyncTarget>(
    conn: &Connection,
    target: &T,
    user_id: &UserId,
    item: &SyncItem,
) -> Result<SyncOutcome<T::Entity>> {
    let id: T::Id = item.id.parse().map_err(|_| {
        Error::InvalidInput(format!("Invalid {} id: {}", T::ENTITY_TYPE, item.id))
    })?;

    with_transaction(conn, async {
        let existing = target.find_live(&id, user_id).await?;

        match item.operation {
            SyncOperation::Create => match existing {
                Some(existing) if existing.sync_version() != item.sync_version => {
                    Ok(SyncOutcome::Conflict(existing))
                }
                Some(existing) => Ok(SyncOutcome::Synced(Some(existing))),
                None => {
                    if target.id_taken(&id).await? {
                        return Err(Error::Conflict(format!(
                            "{} id {id} is already in use",
                            T::ENTITY_TYPE
                        )));
                    }
                    let created = target.create(id, *user_id, &item.data).await?;
                    Ok(SyncOutcome::Synced(Some(created)))
                }
            },
            SyncOperation::Update => {
                let existing =
                    existing.ok_or_else(|| Error::not_found(T::ENTITY_TYPE.as_str(), id))?;
                if existing.sync_version() != item.sync_version {
                    return Ok(SyncOutcome::Conflict(existing));
                }
                match target.update(&existing, &item.data).await? {
                    Some(updated) => Ok(SyncOutcome::Synced(Some(updated))),
                    None => reread_conflict(target, &id, user_id).await,
                }
            }
            SyncOperation::Delete => {
                let Some(existing) = existing else {
                    return Ok(SyncOutcome::Synced(None));
                };
                if existing.sync_version() != item.sync_version {
                    return Ok(SyncOutcome::Conflict(existing));
                }
                if target.delete(&existing).await? {
                    Ok(SyncOutcome::Synced(None))
                } else {
                    reread_conflict(target, &id, user_id).await
                }
            }
        }
    })
    .await
}

/// A conditional write matched nothing: report against whatever is stored now.
async fn reread_conflict<T: SyncTarget>(
    target: &T,
    id: &T::Id,
    user_id: &UserId,
) -> Result<SyncOutcome<T::Entity>> {
    tracing::debug!(entity = %T::ENTITY_TYPE, %id, "Conditional write lost a race");
    target
        .find_current(id, user_id)
        .await?
        .map(SyncOutcome::Conflict)
        .ok_or_else(|| Error::not_found(T::ENTITY_TYPE.as_str(), id))
}

/// Resume point handed to clients: one millisecond before now, since stored
/// timestamps share the millisecond of the read and `since` is exclusive.
fn catch_up_watermark() -> DateTime<Utc> {
    now() - chrono::Duration::milliseconds(1)
}

/// Reconcile a batch item by item. Failures never abort the batch.
async fn reconcile_batch<T: SyncTarget>(
    conn: &Connection,
    target: &T,
    user_id: &UserId,
    items: &[SyncItem],
) -> EntitySyncResult<T::Entity> {
    let mut result = EntitySyncResult::default();

    for item in items {
        match reconcile_item(conn, target, user_id, item).await {
            Ok(SyncOutcome::Synced(Some(entity))) => result.synced.push(entity),
            Ok(SyncOutcome::Synced(None)) => {}
            Ok(SyncOutcome::Conflict(server_version)) => result.conflicts.push(SyncConflict {
                client_version: item.clone(),
                server_version,
            }),
            Err(e) => {
                tracing::warn!(
                    entity = %T::ENTITY_TYPE,
                    id = %compact_text(&item.id),
                    operation = %item.operation,
                    "Sync item failed: {e}"
                );
                result.errors.push(SyncItemError {
                    id: item.id.clone(),
                    operation: item.operation,
                    message: e.to_string(),
                });
            }
        }
    }

    result
}

/// Requested queue status change
enum Transition<'a> {
    Processing,
    Completed,
    Failed(&'a str),
    Conflict(&'a ConflictData),
}

impl Transition<'_> {
    const fn status(&self) -> SyncStatus {
        match self {
            Self::Processing => SyncStatus::Processing,
            Self::Completed => SyncStatus::Completed,
            Self::Failed(_) => SyncStatus::Failed,
            Self::Conflict(_) => SyncStatus::Conflict,
        }
    }
}

/// How a replayed queue entry ended, before it is recorded
enum Replay {
    Completed,
    Conflict(ConflictData),
    Failed(String),
}

async fn replay<T: SyncTarget>(
    conn: &Connection,
    target: &T,
    queued: &SyncQueueItem,
) -> Replay {
    let item = match queued.to_sync_item() {
        Ok(item) => item,
        Err(e) => return Replay::Failed(format!("Malformed payload: {e}")),
    };

    match reconcile_item(conn, target, &queued.user_id, &item).await {
        Ok(SyncOutcome::Synced(_)) => Replay::Completed,
        Ok(SyncOutcome::Conflict(server)) => match serde_json::to_value(&server) {
            Ok(server_state) => Replay::Conflict(ConflictData {
                server_version: server.sync_version(),
                client_version: item.sync_version,
                server_state,
            }),
            Err(e) => Replay::Failed(e.to_string()),
        },
        Err(e) => Replay::Failed(e.to_string()),
    }
}

#[derive(Clone)]
pub struct SyncService {
    db: DatabaseService,
}

impl SyncService {
    #[must_use]
    pub const fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    /// Reconcile a client batch. Projects go first so tasks in the same
    /// batch can reference newly created projects.
    pub async fn sync(&self, user_id: &UserId, request: &SyncRequest) -> Result<SyncResult> {
        let db = self.db.lock().await;
        let conn = db.connection();

        let projects =
            reconcile_batch(conn, &ProjectSyncTarget::new(conn), user_id, &request.projects).await;
        let tasks = reconcile_batch(conn, &TaskSyncTarget::new(conn), user_id, &request.tasks).await;

        tracing::info!(
            tasks_synced = tasks.synced.len(),
            tasks_conflicts = tasks.conflicts.len(),
            projects_synced = projects.synced.len(),
            projects_conflicts = projects.conflicts.len(),
            errors = tasks.errors.len() + projects.errors.len(),
            "Sync batch reconciled"
        );

        Ok(SyncResult {
            tasks,
            projects,
            server_timestamp: catch_up_watermark(),
        })
    }

    /// Everything the user touched strictly after `since` (the epoch when
    /// absent), tombstones included.
    ///
    /// Clients pass the returned `server_timestamp` back as the next `since`.
    /// It trails the read by one millisecond, so a row written in the same
    /// millisecond as this call is returned again rather than skipped.
    pub async fn changes_since(
        &self,
        user_id: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Changes> {
        let since = since.unwrap_or_else(|| from_millis(0));
        let db = self.db.lock().await;
        let conn = db.connection();
        let server_timestamp = catch_up_watermark();

        Ok(Changes {
            tasks: LibSqlTaskRepository::new(conn)
                .changed_since(user_id, since)
                .await?,
            projects: LibSqlProjectRepository::new(conn)
                .changed_since(user_id, since)
                .await?,
            server_timestamp,
        })
    }

    /// Persist an offline operation for later replay.
    pub async fn queue_operation(
        &self,
        user_id: &UserId,
        input: NewSyncQueueItem,
    ) -> Result<SyncQueueItem> {
        let entity_id = input.entity_id.trim().to_string();
        let valid_id = match input.entity_type {
            EntityType::Task => entity_id.parse::<TaskId>().is_ok(),
            EntityType::Project => entity_id.parse::<ProjectId>().is_ok(),
        };
        if !valid_id {
            return Err(Error::InvalidInput(format!(
                "Invalid {} id: {}",
                input.entity_type,
                compact_text(&entity_id)
            )));
        }
        if !(input.payload.is_object() || input.payload.is_null()) {
            return Err(Error::InvalidInput("Payload must be a JSON object".into()));
        }

        let created_at = now();
        let item = SyncQueueItem {
            id: SyncQueueId::new(),
            user_id: *user_id,
            entity_type: input.entity_type,
            entity_id,
            operation: input.operation,
            payload: input.payload,
            client_timestamp: input.client_timestamp.unwrap_or(created_at),
            status: SyncStatus::Pending,
            retry_count: 0,
            error_message: None,
            conflict_data: None,
            processed_at: None,
            created_at,
        };

        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .insert(&item)
            .await?;
        tracing::debug!(queue_item = %item.id, entity = %item.entity_type, "Queued offline operation");
        Ok(item)
    }

    /// Pending queue entries, oldest first.
    pub async fn get_pending_operations(&self, user_id: &UserId) -> Result<Vec<SyncQueueItem>> {
        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .list_pending(user_id)
            .await
    }

    pub async fn mark_processing(&self, user_id: &UserId, id: &SyncQueueId) -> Result<SyncQueueItem> {
        self.transition(user_id, id, Transition::Processing).await
    }

    pub async fn mark_completed(&self, user_id: &UserId, id: &SyncQueueId) -> Result<SyncQueueItem> {
        self.transition(user_id, id, Transition::Completed).await
    }

    /// Record a failed attempt. Retries are unbounded.
    pub async fn mark_failed(
        &self,
        user_id: &UserId,
        id: &SyncQueueId,
        message: &str,
    ) -> Result<SyncQueueItem> {
        self.transition(user_id, id, Transition::Failed(message)).await
    }

    pub async fn mark_conflict(
        &self,
        user_id: &UserId,
        id: &SyncQueueId,
        conflict: &ConflictData,
    ) -> Result<SyncQueueItem> {
        self.transition(user_id, id, Transition::Conflict(conflict))
            .await
    }

    /// Apply a conditional status change to an entry the user owns.
    async fn transition(
        &self,
        user_id: &UserId,
        id: &SyncQueueId,
        to: Transition<'_>,
    ) -> Result<SyncQueueItem> {
        let db = self.db.lock().await;
        let repo = LibSqlSyncQueueRepository::new(db.connection());
        let current = repo
            .find(id, user_id)
            .await?
            .ok_or_else(|| Error::not_found("Queue item", id))?;

        let at = now();
        let moved = match to {
            Transition::Processing => repo.mark_processing(id).await?,
            Transition::Completed => repo.mark_completed(id, at).await?,
            Transition::Failed(message) => repo.mark_failed(id, message, at).await?,
            Transition::Conflict(conflict) => repo.mark_conflict(id, conflict, at).await?,
        };
        if !moved {
            return Err(Error::InvalidState(format!(
                "Queue item {id} cannot move from {} to {}",
                current.status.as_str(),
                to.status().as_str()
            )));
        }

        repo.find(id, user_id)
            .await?
            .ok_or_else(|| Error::not_found("Queue item", id))
    }

    /// Replay the user's pending queue entries through the reconciler, oldest first.
    pub async fn process_queue(&self, user_id: &UserId) -> Result<Vec<QueueProcessOutcome>> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let repo = LibSqlSyncQueueRepository::new(conn);
        let mut outcomes = Vec::new();

        for queued in repo.list_pending(user_id).await? {
            if !repo.mark_processing(&queued.id).await? {
                continue;
            }

            let replayed = match queued.entity_type {
                EntityType::Task => replay(conn, &TaskSyncTarget::new(conn), &queued).await,
                EntityType::Project => replay(conn, &ProjectSyncTarget::new(conn), &queued).await,
            };

            let at = now();
            let (status, error) = match replayed {
                Replay::Completed => {
                    repo.mark_completed(&queued.id, at).await?;
                    (SyncStatus::Completed, None)
                }
                Replay::Conflict(conflict) => {
                    repo.mark_conflict(&queued.id, &conflict, at).await?;
                    (SyncStatus::Conflict, None)
                }
                Replay::Failed(message) => {
                    tracing::warn!(queue_item = %queued.id, "Queued operation failed: {message}");
                    repo.mark_failed(&queued.id, &message, at).await?;
                    (SyncStatus::Failed, Some(message))
                }
            };

            outcomes.push(QueueProcessOutcome {
                id: queued.id,
                entity_type: queued.entity_type,
                entity_id: queued.entity_id,
                status,
                error,
            });
        }

        tracing::info!("Processed {} queued operation(s)", outcomes.len());
        Ok(outcomes)
    }
}
