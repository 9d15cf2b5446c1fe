//! Audit log repository implementation

use chrono::{DateTime, Utc};
use libsql::{Connection, Row, Value};

use super::values::{integer, millis, opt_json, opt_text, parse_enum, parse_id, parse_opt_id, parse_opt_json, text};
use crate::error::Result;
use crate::models::{AuditAction, AuditLog, AuditLogId, AuditQuery, AuditStat, NewAuditEntry, UserId};
use crate::util::from_millis;

const AUDIT_SELECT: &str = "SELECT id, user_id, target_user_id, action, entity_type, entity_id,
        previous_state, new_state, metadata, created_at
    FROM audit_logs";

/// Trait for audit log storage operations (async)
#[allow(async_fn_in_trait)]
pub trait AuditRepository {
    /// Append an entry
    async fn insert(&self, entry: &NewAuditEntry, at: DateTime<Utc>) -> Result<AuditLog>;

    /// Entries about one entity, newest first
    async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        query: &AuditQuery,
    ) -> Result<Vec<AuditLog>>;

    /// Entries performed by a user, newest first
    async fn find_by_user(&self, user_id: &UserId, query: &AuditQuery) -> Result<Vec<AuditLog>>;

    /// Entries of one action across users, newest first
    async fn find_by_action(&self, action: AuditAction, query: &AuditQuery)
        -> Result<Vec<AuditLog>>;

    /// Per-action counts for a user, most frequent first
    async fn stats(
        &self,
        user_id: &UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditStat>>;

    /// Delete entries created before `cutoff`
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// libSQL implementation of `AuditRepository`
pub struct LibSqlAuditRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlAuditRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<AuditLog> {
        Ok(AuditLog {
            id: parse_id(&row.get::<String>(0)?, "audit_logs.id")?,
            user_id: parse_id(&row.get::<String>(1)?, "audit_logs.user_id")?,
            target_user_id: parse_opt_id(row.get(2)?, "audit_logs.target_user_id")?,
            action: parse_enum(&row.get::<String>(3)?, "audit_logs.action")?,
            entity_type: row.get(4)?,
            entity_id: row.get(5)?,
            previous_state: parse_opt_json(row.get(6)?)?,
            new_state: parse_opt_json(row.get(7)?)?,
            metadata: parse_opt_json(row.get(8)?)?,
            created_at: from_millis(row.get(9)?),
        })
    }

    /// Run `AUDIT_SELECT` with extra conditions plus the query's window and paging
    async fn query_entries(
        &self,
        mut conditions: Vec<&'static str>,
        mut params: Vec<Value>,
        query: &AuditQuery,
    ) -> Result<Vec<AuditLog>> {
        if let Some(action) = query.action {
            conditions.push("action = ?");
            params.push(text(action.as_str()));
        }
        if let Some(start) = &query.start_date {
            conditions.push("created_at >= ?");
            params.push(millis(start));
        }
        if let Some(end) = &query.end_date {
            conditions.push("created_at <= ?");
            params.push(millis(end));
        }
        params.push(integer(i64::from(query.limit())));
        params.push(integer(i64::from(query.offset())));

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "{AUDIT_SELECT}{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut rows = self.conn.query(&sql, params).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }
}

impl AuditRepository for LibSqlAuditRepository<'_> {
    async fn insert(&self, entry: &NewAuditEntry, at: DateTime<Utc>) -> Result<AuditLog> {
        let log = AuditLog {
            id: AuditLogId::new(),
            user_id: entry.user_id,
            target_user_id: entry.target_user_id,
            action: entry.action,
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.clone(),
            previous_state: entry.previous_state.clone(),
            new_state: entry.new_state.clone(),
            metadata: entry.metadata.clone(),
            created_at: at,
        };

        self.conn
            .execute(
                "INSERT INTO audit_logs (id, user_id, target_user_id, action, entity_type,
                    entity_id, previous_state, new_state, metadata, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(log.id.as_str()),
                    text(log.user_id.as_str()),
                    opt_text(log.target_user_id.map(|id| id.as_str())),
                    text(log.action.as_str()),
                    text(log.entity_type.as_str()),
                    text(log.entity_id.as_str()),
                    opt_json(log.previous_state.as_ref())?,
                    opt_json(log.new_state.as_ref())?,
                    opt_json(log.metadata.as_ref())?,
                    millis(&log.created_at),
                ],
            )
            .await?;

        Ok(log)
    }

    async fn find_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        query: &AuditQuery,
    ) -> Result<Vec<AuditLog>> {
        self.query_entries(
            vec!["entity_type = ?", "entity_id = ?"],
            vec![text(entity_type), text(entity_id)],
            query,
        )
        .await
    }

    async fn find_by_user(&self, user_id: &UserId, query: &AuditQuery) -> Result<Vec<AuditLog>> {
        self.query_entries(vec!["user_id = ?"], vec![text(user_id.as_str())], query)
            .await
    }

    async fn find_by_action(
        &self,
        action: AuditAction,
        query: &AuditQuery,
    ) -> Result<Vec<AuditLog>> {
        let query = AuditQuery {
            action: Some(action),
            ..query.clone()
        };
        self.query_entries(Vec::new(), Vec::new(), &query).await
    }

    async fn stats(
        &self,
        user_id: &UserId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditStat>> {
        let mut sql = String::from("SELECT action, COUNT(*) AS count FROM audit_logs WHERE user_id = ?");
        let mut params = vec![text(user_id.as_str())];
        if let Some(start) = &start {
            sql.push_str(" AND created_at >= ?");
            params.push(millis(start));
        }
        if let Some(end) = &end {
            sql.push_str(" AND created_at <= ?");
            params.push(millis(end));
        }
        sql.push_str(" GROUP BY action ORDER BY count DESC, action ASC");

        let mut rows = self.conn.query(&sql, params).await?;
        let mut stats = Vec::new();
        while let Some(row) = rows.next().await? {
            stats.push(AuditStat {
                action: parse_enum(&row.get::<String>(0)?, "audit_logs.action")?,
                count: row.get(1)?,
            });
        }
        Ok(stats)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM audit_logs WHERE created_at < ?",
                vec![millis(&cutoff)],
            )
            .await?)
    }
}
