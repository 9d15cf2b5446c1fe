//! Database layer for TodoListi

mod audit_repository;
mod connection;
mod migrations;
mod permission_repository;
mod project_repository;
mod sync_queue_repository;
mod tag_repository;
mod task_repository;
mod transaction;
mod user_repository;
mod values;

pub use audit_repository::{AuditRepository, LibSqlAuditRepository};
pub use connection::{Database, IN_MEMORY_PATH};
pub use permission_repository::{LibSqlPermissionRepository, PermissionRepository};
pub use project_repository::{LibSqlProjectRepository, ProjectRepository};
pub use sync_queue_repository::{LibSqlSyncQueueRepository, SyncQueueRepository};
pub use tag_repository::{LibSqlTagRepository, TagRepository};
pub use task_repository::{LibSqlTaskRepository, TaskRepository};
pub use transaction::with_transaction;
pub use user_repository::{LibSqlUserRepository, UserRepository};
