//! Project model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{double_option, validate_color, ProjectId, UserId, Versioned, DEFAULT_COLOR};
use crate::error::{Error, Result};
use crate::util::normalize_text_option;

const PROJECT_NAME_MAX_LEN: usize = 255;
const ICON_MAX_LEN: usize = 50;

/// A project grouping tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub user_id: UserId,
    pub name: String,
    pub description: Option<String>,
    /// Hex color (`#RRGGBB`)
    pub color: String,
    /// Material icon name
    pub icon: Option<String>,
    pub is_archived: bool,
    pub sort_order: i64,
    pub sync_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Project {
    /// Build a fresh project at version 1 from validated input
    #[must_use]
    pub fn from_new(id: ProjectId, user_id: UserId, input: NewProject, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id,
            name: input.name.trim().to_string(),
            description: normalize_text_option(input.description),
            color: input.color.unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            icon: normalize_text_option(input.icon),
            is_archived: input.is_archived.unwrap_or(false),
            sort_order: input.sort_order.unwrap_or(0),
            sync_version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

impl Versioned for Project {
    fn sync_version(&self) -> i64 {
        self.sync_version
    }
}

/// Input for creating a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_archived: Option<bool>,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

impl NewProject {
    /// Shorthand for a project with only a name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if let Some(color) = &self.color {
            validate_color(color)?;
        }
        validate_icon(self.icon.as_deref())
    }
}

/// Partial update of a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub icon: Option<Option<String>>,
    #[serde(default)]
    pub is_archived: Option<bool>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    /// Version the client last saw. When present, a mismatch is a conflict.
    #[serde(default)]
    pub sync_version: Option<i64>,
}

impl ProjectChanges {
    /// Changes that only archive the project
    #[must_use]
    pub fn archive() -> Self {
        Self {
            is_archived: Some(true),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(color) = &self.color {
            validate_color(color)?;
        }
        if let Some(icon) = &self.icon {
            validate_icon(icon.as_deref())?;
        }
        Ok(())
    }

    pub fn apply_to(&self, project: &mut Project) {
        if let Some(name) = &self.name {
            project.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            project.description = normalize_text_option(description.clone());
        }
        if let Some(color) = &self.color {
            project.color.clone_from(color);
        }
        if let Some(icon) = &self.icon {
            project.icon = normalize_text_option(icon.clone());
        }
        if let Some(is_archived) = self.is_archived {
            project.is_archived = is_archived;
        }
        if let Some(sort_order) = self.sort_order {
            project.sort_order = sort_order;
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Project name must not be empty".into()));
    }
    if name.chars().count() > PROJECT_NAME_MAX_LEN {
        return Err(Error::InvalidInput(format!(
            "Project name must be at most {PROJECT_NAME_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_icon(icon: Option<&str>) -> Result<()> {
    if icon.is_some_and(|icon| icon.trim().chars().count() > ICON_MAX_LEN) {
        return Err(Error::InvalidInput(format!(
            "Project icon must be at most {ICON_MAX_LEN} characters"
        )));
    }
    Ok(())
}
