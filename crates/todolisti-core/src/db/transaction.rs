//! Transaction helper shared by services

use std::future::Future;

use libsql::Connection;

use crate::error::Result;

/// Run `operation` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back on error.
///
/// Every statement the future issues must go through `conn`. Transactions do
/// not nest; callers hold the database lock for the whole operation.
pub async fn with_transaction<T, F>(conn: &Connection, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    conn.execute("BEGIN IMMEDIATE", ()).await?;

    match operation.await {
        Ok(value) => {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = conn.execute("ROLLBACK", ()).await {
                tracing::warn!("Rollback failed: {rollback_error}");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::Error;

    async fn count_users(conn: &Connection) -> i64 {
        let mut rows = conn.query("SELECT COUNT(*) FROM users", ()).await.unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_commit_on_success() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        with_transaction(conn, async {
            conn.execute(
                "INSERT INTO users (id, email, created_at, updated_at) VALUES ('u1', 'a@x.io', 0, 0)",
                (),
            )
            .await?;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(count_users(conn).await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rollback_on_error() {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection();
        let result: Result<()> = with_transaction(conn, async {
            conn.execute(
                "INSERT INTO users (id, email, created_at, updated_at) VALUES ('u1', 'a@x.io', 0, 0)",
                (),
            )
            .await?;
            Err(Error::InvalidState("abort".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert_eq!(count_users(conn).await, 0);
    }
}
