//! Shared database handle used by every service.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::db::{Database, IN_MEMORY_PATH};
use crate::Result;

/// Thread-safe handle to the single libSQL connection.
///
/// Services hold the lock for the duration of one operation, so
/// multi-statement work (including transactions) never interleaves.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path (or `:memory:`).
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if db_path.as_os_str() != IN_MEMORY_PATH {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!("Opening database at {}", db_path.display());
        let db = Database::open(&db_path).await?;
        Ok(Self::from_database(db))
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory().await?))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Acquire exclusive use of the connection.
    pub async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    /// Cheap liveness probe for health checks.
    pub async fn ping(&self) -> Result<()> {
        let db = self.lock().await;
        let mut rows = db.connection().query("SELECT 1", ()).await?;
        rows.next().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_service_answers_ping() {
        let service = DatabaseService::open_in_memory().await.unwrap();
        service.ping().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("todolisti.db");

        let service = DatabaseService::open_path(&db_path).await.unwrap();
        service.ping().await.unwrap();
        assert!(db_path.exists());
    }
}
