//! todolisti-core - Core library for TodoListi
//!
//! This crate contains the models, libSQL storage layer, and services shared
//! by every TodoListi interface: the permission engine for delegated access,
//! the offline sync reconciler, and the task, project, and tag services.

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod util;

pub use error::{Error, Result};
pub use services::{Access, Services};
