//! Services shared by every TodoListi interface.

mod audit;
mod database;
mod permissions;
mod projects;
mod sync;
mod tags;
mod tasks;
mod users;

pub use audit::AuditService;
pub use database::DatabaseService;
pub use permissions::{PermissionService, DEFAULT_INVITATION_TTL_DAYS};
pub use projects::ProjectService;
pub use sync::{SyncService, SyncTarget};
pub use tags::TagService;
pub use tasks::TaskService;
pub use users::UserService;

use crate::models::UserId;

/// Whose data an operation touches and who is performing it.
///
/// `acting == owner` is plain self-access; anything else is delegated and
/// goes through the permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access {
    pub owner: UserId,
    pub acting: UserId,
}

impl Access {
    /// A user working on their own data
    #[must_use]
    pub const fn own(user_id: UserId) -> Self {
        Self {
            owner: user_id,
            acting: user_id,
        }
    }

    /// `acting` working on `owner`'s data
    #[must_use]
    pub const fn delegated(acting: UserId, owner: UserId) -> Self {
        Self { owner, acting }
    }

    #[must_use]
    pub fn is_delegated(&self) -> bool {
        self.owner != self.acting
    }
}

/// Bundle of every service over one shared database.
#[derive(Clone)]
pub struct Services {
    pub database: DatabaseService,
    pub users: UserService,
    pub permissions: PermissionService,
    pub tasks: TaskService,
    pub projects: ProjectService,
    pub tags: TagService,
    pub sync: SyncService,
    pub audit: AuditService,
}

impl Services {
    #[must_use]
    pub fn new(database: DatabaseService) -> Self {
        Self {
            users: UserService::new(database.clone()),
            permissions: PermissionService::new(database.clone()),
            tasks: TaskService::new(database.clone()),
            projects: ProjectService::new(database.clone()),
            tags: TagService::new(database.clone()),
            sync: SyncService::new(database.clone()),
            audit: AuditService::new(database.clone()),
            database,
        }
    }

    /// In-memory services for tests
    pub async fn in_memory() -> crate::Result<Self> {
        Ok(Self::new(DatabaseService::open_in_memory().await?))
    }
}
