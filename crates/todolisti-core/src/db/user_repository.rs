//! User repository implementation

use libsql::{Connection, Row};

use super::values::{flag, millis, opt_text, parse_id, text};
use crate::error::Result;
use crate::models::{User, UserId};
use crate::util::from_millis;

const USER_COLUMNS: &str = "id, email, name, timezone, is_active, created_at, updated_at";

/// Trait for user storage operations (async)
#[allow(async_fn_in_trait)]
pub trait UserRepository {
    /// Insert a new user
    async fn insert(&self, user: &User) -> Result<()>;

    /// Get a user by ID
    async fn find(&self, id: &UserId) -> Result<Option<User>>;

    /// Get a user by (case-insensitive) email
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Activate or deactivate an account
    async fn set_active(&self, id: &UserId, is_active: bool) -> Result<bool>;
}

/// libSQL implementation of `UserRepository`
pub struct LibSqlUserRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlUserRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_user(row: &Row) -> Result<User> {
        Ok(User {
            id: parse_id(&row.get::<String>(0)?, "users.id")?,
            email: row.get(1)?,
            name: row.get(2)?,
            timezone: row.get(3)?,
            is_active: row.get::<i64>(4)? != 0,
            created_at: from_millis(row.get(5)?),
            updated_at: from_millis(row.get(6)?),
        })
    }

    async fn find_one(&self, sql: &str, key: String) -> Result<Option<User>> {
        let mut rows = self.conn.query(sql, libsql::params![key]).await?;
        rows.next()
            .await?
            .map(|row| Self::parse_user(&row))
            .transpose()
    }
}

impl UserRepository for LibSqlUserRepository<'_> {
    async fn insert(&self, user: &User) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (id, email, name, timezone, is_active, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(user.id.as_str()),
                    text(user.email.as_str()),
                    opt_text(user.name.as_deref()),
                    text(user.timezone.as_str()),
                    flag(user.is_active),
                    millis(&user.created_at),
                    millis(&user.updated_at),
                ],
            )
            .await?;
        Ok(())
    }

    async fn find(&self, id: &UserId) -> Result<Option<User>> {
        self.find_one(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
            id.as_str(),
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_one(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ? COLLATE NOCASE"),
            email.trim().to_string(),
        )
        .await
    }

    async fn set_active(&self, id: &UserId, is_active: bool) -> Result<bool> {
        let now = crate::util::now();
        let affected = self
            .conn
            .execute(
                "UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?",
                vec![flag(is_active), millis(&now), text(id.as_str())],
            )
            .await?;
        Ok(affected == 1)
    }
}
