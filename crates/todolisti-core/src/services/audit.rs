//! Audit sink: append-only record of sensitive mutations.

use chrono::{DateTime, Utc};
use libsql::Connection;

use super::DatabaseService;
use crate::db::{AuditRepository, LibSqlAuditRepository};
use crate::models::{AuditAction, AuditLog, AuditQuery, AuditStat, NewAuditEntry, UserId};
use crate::util::now;
use crate::Result;

/// Append `entry` on an already locked connection, typically inside the
/// transaction of the mutation it describes.
pub(crate) async fn record(conn: &Connection, entry: NewAuditEntry) -> Result<AuditLog> {
    let log = LibSqlAuditRepository::new(conn).insert(&entry, now()).await?;
    tracing::debug!(
        action = %log.action,
        entity_type = %log.entity_type,
        entity_id = %log.entity_id,
        "Recorded audit entry"
    );
    Ok(log)
}

/// Read and maintenance access to the audit log.
#[derive(Clone)]
pub struct AuditService {
    db: DatabaseService,
}

impl AuditService {
    #[must_use]
    pub const fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    /// Append a standalone entry.
    pub async fn log(&self, entry: NewAuditEntry) -> Result<AuditLog> {
        let db = self.db.lock().await;
        record(db.connection(), entry).await
    }

    /// Entries about one entity, newest first.
    pub async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        query: &AuditQuery,
    ) -> Result<Vec<AuditLog>> {
        let db = self.db.lock().await;
        LibSqlAuditRepository::new(db.connection())
            .find_by_entity(entity_type, entity_id, query)
            .await
    }

    /// Entries performed by `user_id`, newest first.
    pub async fn find_by_user(&self, user_id: &UserId, query: &AuditQuery) -> Result<Vec<AuditLog>> {
        let db = self.db.lock().await;
        LibSqlAuditRepository::new(db.connection())
            .find_by_user(user_id, query)
            .await
    }

    /// Entries of one action type, newest first.
    pub async fn find_by_action(
        &self,
        action: AuditAction,
        query: &AuditQuery,
    ) -> Result<Vec<AuditLog>> {
        let db = self.db.lock().await;
        LibSqlAuditRepository::new(db.connection())
            .find_by_action(action, query)
            .await
    }

    /// Per-action counts for `user_id`.
    pub async fn stats(
        &self,
        user_id: &UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditStat>> {
        let db = self.db.lock().await;
        LibSqlAuditRepository::new(db.connection())
            .stats(user_id, start, end)
            .await
    }

    /// Retention cleanup: delete entries created before `older_than`.
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let db = self.db.lock().await;
        let removed = LibSqlAuditRepository::new(db.connection())
            .delete_older_than(older_than)
            .await?;
        tracing::info!("Removed {removed} audit entries older than {older_than}");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn log_then_find_by_user() {
        let service = AuditService::new(DatabaseService::open_in_memory().await.unwrap());
        let actor = UserId::new();

        service
            .log(NewAuditEntry::new(actor, AuditAction::ProjectArchive, "project", "p-1"))
            .await
            .unwrap();

        let entries = service.find_by_user(&actor, &AuditQuery::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::ProjectArchive);

        let stats = service.stats(&actor, None, None).await.unwrap();
        assert_eq!(stats[0].count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleanup_keeps_recent_entries() {
        let service = AuditService::new(DatabaseService::open_in_memory().await.unwrap());
        let actor = UserId::new();
        service
            .log(NewAuditEntry::new(actor, AuditAction::TaskCreate, "task", "t-1"))
            .await
            .unwrap();

        let removed = service
            .cleanup(now() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(
            service
                .find_by_entity("task", "t-1", &AuditQuery::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
