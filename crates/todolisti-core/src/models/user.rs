//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::UserId;

/// An account, provisioned from a verified access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    /// IANA timezone name
    pub timezone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create an active user with the default timezone
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>, name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: crate::util::normalize_email(&email.into()),
            name: crate::util::normalize_text_option(name),
            timezone: "UTC".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
