//! Account provisioning from verified identity claims.

use super::DatabaseService;
use crate::db::{LibSqlUserRepository, UserRepository};
use crate::error::Error;
use crate::models::{User, UserId};
use crate::util::{normalize_email, now};
use crate::Result;

#[derive(Clone)]
pub struct UserService {
    db: DatabaseService,
}

impl UserService {
    #[must_use]
    pub const fn new(db: DatabaseService) -> Self {
        Self { db }
    }

    /// Return the user for `id`, creating the row on first sight.
    ///
    /// Fails with `Conflict` when another account already owns the email.
    pub async fn provision(&self, id: UserId, email: &str, name: Option<String>) -> Result<User> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(Error::InvalidInput("Email must not be empty".into()));
        }

        let db = self.db.lock().await;
        let repo = LibSqlUserRepository::new(db.connection());
        if let Some(user) = repo.find(&id).await? {
            return Ok(user);
        }
        if repo.find_by_email(&email).await?.is_some() {
            return Err(Error::Conflict(format!(
                "Email {email} belongs to another account"
            )));
        }

        let user = User::new(id, email, name, now());
        repo.insert(&user).await?;
        tracing::info!("Provisioned new user account {}", user.id);
        Ok(user)
    }

    pub async fn find(&self, id: &UserId) -> Result<Option<User>> {
        let db = self.db.lock().await;
        LibSqlUserRepository::new(db.connection()).find(id).await
    }

    /// Activate or deactivate an account.
    pub async fn set_active(&self, id: &UserId, is_active: bool) -> Result<()> {
        let db = self.db.lock().await;
        if LibSqlUserRepository::new(db.connection())
            .set_active(id, is_active)
            .await?
        {
            Ok(())
        } else {
            Err(Error::not_found("User", id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn provision_is_idempotent() {
        let service = UserService::new(DatabaseService::open_in_memory().await.unwrap());
        let id = UserId::new();

        let first = service.provision(id, "Me@Example.com", None).await.unwrap();
        let second = service.provision(id, "me@example.com", None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.email, "me@example.com");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn provision_rejects_taken_email() {
        let service = UserService::new(DatabaseService::open_in_memory().await.unwrap());
        service.provision(UserId::new(), "me@example.com", None).await.unwrap();

        let err = service
            .provision(UserId::new(), "me@example.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deactivate_unknown_user_is_not_found() {
        let service = UserService::new(DatabaseService::open_in_memory().await.unwrap());
        let err = service.set_active(&UserId::new(), false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
