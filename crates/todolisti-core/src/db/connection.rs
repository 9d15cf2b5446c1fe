//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// In-memory database path accepted by [`Database::open`]
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Database wrapper for a libSQL connection
pub struct Database {
    // Keeps the database handle alive for as long as the connection is used.
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically. `:memory:` opens a throwaway database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        if path_str == IN_MEMORY_PATH {
            return Self::open_in_memory().await;
        }

        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;
        tracing::debug!("Opened database at {path_str}");
        Self::initialize(db, conn, true).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(IN_MEMORY_PATH).build().await?;
        let conn = db.connect()?;
        Self::initialize(db, conn, false).await
    }

    async fn initialize(db: LibSqlDatabase, conn: Connection, on_disk: bool) -> Result<Self> {
        let database = Self { _db: db, conn };
        database.configure(on_disk).await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` pragmas
    async fn configure(&self, on_disk: bool) -> Result<()> {
        if on_disk {
            // journal_mode returns a row, so it goes through query
            self.conn.query("PRAGMA journal_mode = WAL;", ()).await.ok();
            self.conn
                .execute("PRAGMA synchronous = NORMAL;", ())
                .await
                .ok();
        }
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        self.conn.execute("PRAGMA busy_timeout = 5000;", ()).await.ok();
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
