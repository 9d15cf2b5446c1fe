//! Durable sync queue repository implementation

use chrono::{DateTime, Utc};
use libsql::{Connection, Row, Value};

use super::values::{integer, json, millis, opt_json, opt_millis, opt_text, parse_enum, parse_id, parse_opt_json, text};
use crate::error::Result;
use crate::models::{ConflictData, SyncQueueId, SyncQueueItem, SyncStatus, UserId};
use crate::util::{from_millis, from_millis_opt};

const QUEUE_SELECT: &str = "SELECT id, user_id, entity_type, entity_id, operation, payload,
        client_timestamp, status, retry_count, error_message, conflict_data, processed_at,
        created_at
    FROM sync_queue";

/// Trait for sync queue storage operations (async).
///
/// Status changes are conditional on the current status so an entry never
/// moves backward, even when two processors race.
#[allow(async_fn_in_trait)]
pub trait SyncQueueRepository {
    async fn insert(&self, item: &SyncQueueItem) -> Result<()>;

    async fn find(&self, id: &SyncQueueId, user_id: &UserId) -> Result<Option<SyncQueueItem>>;

    /// Pending entries for a user, oldest first
    async fn list_pending(&self, user_id: &UserId) -> Result<Vec<SyncQueueItem>>;

    /// pending -> processing
    async fn mark_processing(&self, id: &SyncQueueId) -> Result<bool>;

    /// pending | processing | failed -> completed
    async fn mark_completed(&self, id: &SyncQueueId, now: DateTime<Utc>) -> Result<bool>;

    /// pending | processing | failed -> failed, incrementing the retry count
    async fn mark_failed(&self, id: &SyncQueueId, message: &str, now: DateTime<Utc>)
        -> Result<bool>;

    /// processing -> conflict
    async fn mark_conflict(
        &self,
        id: &SyncQueueId,
        conflict: &ConflictData,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// libSQL implementation of `SyncQueueRepository`
pub struct LibSqlSyncQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &Row) -> Result<SyncQueueItem> {
        Ok(SyncQueueItem {
            id: parse_id(&row.get::<String>(0)?, "sync_queue.id")?,
            user_id: parse_id(&row.get::<String>(1)?, "sync_queue.user_id")?,
            entity_type: parse_enum(&row.get::<String>(2)?, "sync_queue.entity_type")?,
            entity_id: row.get(3)?,
            operation: parse_enum(&row.get::<String>(4)?, "sync_queue.operation")?,
            payload: serde_json::from_str(&row.get::<String>(5)?)?,
            client_timestamp: from_millis(row.get(6)?),
            status: parse_enum(&row.get::<String>(7)?, "sync_queue.status")?,
            retry_count: row.get(8)?,
            error_message: row.get(9)?,
            conflict_data: parse_opt_json(row.get(10)?)?,
            processed_at: from_millis_opt(row.get(11)?),
            created_at: from_millis(row.get(12)?),
        })
    }

    async fn transition(&self, sql: &str, params: Vec<Value>) -> Result<bool> {
        Ok(self.conn.execute(sql, params).await? == 1)
    }
}

impl SyncQueueRepository for LibSqlSyncQueueRepository<'_> {
    async fn insert(&self, item: &SyncQueueItem) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_queue (id, user_id, entity_type, entity_id, operation, payload,
                    client_timestamp, status, retry_count, error_message, conflict_data,
                    processed_at, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(item.id.as_str()),
                    text(item.user_id.as_str()),
                    text(item.entity_type.as_str()),
                    text(item.entity_id.as_str()),
                    text(item.operation.as_str()),
                    json(&item.payload)?,
                    millis(&item.client_timestamp),
                    text(item.status.as_str()),
                    integer(item.retry_count),
                    opt_text(item.error_message.as_deref()),
                    opt_json(item.conflict_data.as_ref())?,
                    opt_millis(item.processed_at.as_ref()),
                    millis(&item.created_at),
                ],
            )
            .await?;
        Ok(())
    }

    async fn find(&self, id: &SyncQueueId, user_id: &UserId) -> Result<Option<SyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                &format!("{QUEUE_SELECT} WHERE id = ? AND user_id = ?"),
                libsql::params![id.as_str(), user_id.as_str()],
            )
            .await?;
        rows.next()
            .await?
            .map(|row| Self::parse_item(&row))
            .transpose()
    }

    async fn list_pending(&self, user_id: &UserId) -> Result<Vec<SyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "{QUEUE_SELECT} WHERE user_id = ? AND status = ? ORDER BY created_at ASC, id ASC"
                ),
                libsql::params![user_id.as_str(), SyncStatus::Pending.as_str()],
            )
            .await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    async fn mark_processing(&self, id: &SyncQueueId) -> Result<bool> {
        self.transition(
            "UPDATE sync_queue SET status = 'processing' WHERE id = ? AND status = 'pending'",
            vec![text(id.as_str())],
        )
        .await
    }

    async fn mark_completed(&self, id: &SyncQueueId, now: DateTime<Utc>) -> Result<bool> {
        self.transition(
            "UPDATE sync_queue SET status = 'completed', processed_at = ?
             WHERE id = ? AND status IN ('pending', 'processing', 'failed')",
            vec![millis(&now), text(id.as_str())],
        )
        .await
    }

    async fn mark_failed(
        &self,
        id: &SyncQueueId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(
            "UPDATE sync_queue SET status = 'failed', retry_count = retry_count + 1,
                error_message = ?, processed_at = ?
             WHERE id = ? AND status IN ('pending', 'processing', 'failed')",
            vec![text(message), millis(&now), text(id.as_str())],
        )
        .await
    }

    async fn mark_conflict(
        &self,
        id: &SyncQueueId,
        conflict: &ConflictData,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.transition(
            "UPDATE sync_queue SET status = 'conflict', conflict_data = ?, processed_at = ?
             WHERE id = ? AND status = 'processing'",
            vec![json(conflict)?, millis(&now), text(id.as_str())],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::insert_user;
    use crate::db::Database;
    use crate::models::{EntityType, SyncOperation};
    use crate::util::now;

    fn queued(user_id: UserId) -> SyncQueueItem {
        let at = now();
        SyncQueueItem {
            id: SyncQueueId::new(),
            user_id,
            entity_type: EntityType::Task,
            entity_id: "entity-1".into(),
            operation: SyncOperation::Update,
            payload: serde_json::json!({"syncVersion": 1, "data": {"title": "x"}}),
            client_timestamp: at,
            status: SyncStatus::Pending,
            retry_count: 0,
            error_message: None,
            conflict_data: None,
            processed_at: None,
            created_at: at,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_never_moves_backward() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlSyncQueueRepository::new(conn);

        let item = queued(user);
        repo.insert(&item).await.unwrap();

        assert!(repo.mark_processing(&item.id).await.unwrap());
        assert!(!repo.mark_processing(&item.id).await.unwrap());
        assert!(repo.mark_failed(&item.id, "boom", now()).await.unwrap());
        assert!(repo.mark_failed(&item.id, "boom again", now()).await.unwrap());
        assert!(!repo
            .mark_conflict(
                &item.id,
                &ConflictData {
                    server_version: 2,
                    client_version: 1,
                    server_state: serde_json::Value::Null,
                },
                now()
            )
            .await
            .unwrap());
        assert!(repo.mark_completed(&item.id, now()).await.unwrap());
        assert!(!repo.mark_failed(&item.id, "late", now()).await.unwrap());

        let stored = repo.find(&item.id, &user).await.unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Completed);
        assert_eq!(stored.retry_count, 2);
        assert_eq!(stored.error_message.as_deref(), Some("boom again"));
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_items_settle_without_processing() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlSyncQueueRepository::new(conn);

        let done = queued(user);
        let broken = queued(user);
        repo.insert(&done).await.unwrap();
        repo.insert(&broken).await.unwrap();

        assert!(repo.mark_completed(&done.id, now()).await.unwrap());
        assert!(repo.mark_failed(&broken.id, "offline", now()).await.unwrap());
        // conflicts are only recorded for a replay in progress
        assert!(!repo
            .mark_conflict(
                &done.id,
                &ConflictData {
                    server_version: 2,
                    client_version: 1,
                    server_state: serde_json::Value::Null,
                },
                now()
            )
            .await
            .unwrap());

        let done = repo.find(&done.id, &user).await.unwrap().unwrap();
        assert_eq!(done.status, SyncStatus::Completed);
        let broken = repo.find(&broken.id, &user).await.unwrap().unwrap();
        assert_eq!(broken.status, SyncStatus::Failed);
        assert_eq!(broken.retry_count, 1);
        assert!(repo.list_pending(&user).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_pending_excludes_other_states() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let user = insert_user(conn, "owner@example.com").await;
        let repo = LibSqlSyncQueueRepository::new(conn);

        let first = queued(user);
        let second = queued(user);
        repo.insert(&first).await.unwrap();
        repo.insert(&second).await.unwrap();
        repo.mark_processing(&first.id).await.unwrap();

        let pending = repo.list_pending(&user).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[0].payload, second.payload);
    }
}
