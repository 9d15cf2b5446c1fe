//! Tag model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{validate_color, TagId, UserId, DEFAULT_COLOR};
use crate::error::{Error, Result};

const TAG_NAME_MAX_LEN: usize = 100;

/// A tag for categorizing tasks across projects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: TagId,
    pub user_id: UserId,
    pub name: String,
    /// Hex color (`#RRGGBB`)
    pub color: String,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    /// Create a new tag for `user_id`
    #[must_use]
    pub fn new(user_id: UserId, input: NewTag, now: DateTime<Utc>) -> Self {
        Self {
            id: TagId::new(),
            user_id,
            name: input.name.trim().to_string(),
            color: input.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            created_at: now,
        }
    }
}

/// Input for creating a tag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTag {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl NewTag {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        self.color.as_deref().map_or(Ok(()), validate_color)
    }
}

/// Partial update of a tag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl TagChanges {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        self.color.as_deref().map_or(Ok(()), validate_color)
    }

    pub fn apply_to(&self, tag: &mut Tag) {
        if let Some(name) = &self.name {
            tag.name = name.trim().to_string();
        }
        if let Some(color) = &self.color {
            tag.color.clone_from(color);
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Tag name must not be empty".into()));
    }
    if name.chars().count() > TAG_NAME_MAX_LEN {
        return Err(Error::InvalidInput(format!(
            "Tag name must be at most {TAG_NAME_MAX_LEN} characters"
        )));
    }
    Ok(())
}
