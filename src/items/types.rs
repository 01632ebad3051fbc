//! Item records and listing input validation

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ItemState;
use crate::core_types::{ItemId, Points, UserId};
use crate::error::ExchangeError;

pub const MIN_POINTS: Points = 1;
pub const MAX_POINTS: Points = 200;
const MAX_TITLE_LEN: usize = 120;
const MAX_DESCRIPTION_LEN: usize = 2000;
const MAX_TAGS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Excellent,
    Good,
    Fair,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Excellent => "excellent",
            Condition::Good => "good",
            Condition::Fair => "fair",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Condition {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "excellent" => Ok(Condition::Excellent),
            "good" => Ok(Condition::Good),
            "fair" => Ok(Condition::Fair),
            other => Err(ExchangeError::validation(
                "condition",
                format!("'{}' is not one of excellent, good, fair", other),
            )),
        }
    }
}

/// A clothing listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner: UserId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub size: String,
    pub condition: Condition,
    pub tags: Vec<String>,
    pub points_required: Points,
    pub state: ItemState,
    pub featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by the store on every commit
    pub version: u64,
}

impl Item {
    pub fn is_exchangeable(&self) -> bool {
        self.state == ItemState::Available
    }
}

/// Listing input as submitted by the owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDraft {
    pub title: String,
    pub description: String,
    pub category: String,
    pub size: String,
    pub condition: Condition,
    #[serde(default)]
    pub tags: Vec<String>,
    pub points_required: Points,
}

impl ItemDraft {
    /// Validate and normalize (trim text, drop blank/duplicate tags)
    pub fn validated(self) -> Result<Self, ExchangeError> {
        Ok(Self {
            title: required_text("title", &self.title, MAX_TITLE_LEN)?,
            description: required_text("description", &self.description, MAX_DESCRIPTION_LEN)?,
            category: required_text("category", &self.category, MAX_TITLE_LEN)?,
            size: required_text("size", &self.size, MAX_TITLE_LEN)?,
            condition: self.condition,
            tags: normalize_tags(self.tags)?,
            points_required: validate_points(self.points_required)?,
        })
    }
}

/// Partial update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub size: Option<String>,
    pub condition: Option<Condition>,
    pub tags: Option<Vec<String>>,
    pub points_required: Option<Points>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == ItemPatch::default()
    }

    /// Apply onto an item, validating every provided field
    pub fn apply_to(self, item: &mut Item) -> Result<(), ExchangeError> {
        if let Some(title) = self.title {
            item.title = required_text("title", &title, MAX_TITLE_LEN)?;
        }
        if let Some(description) = self.description {
            item.description = required_text("description", &description, MAX_DESCRIPTION_LEN)?;
        }
        if let Some(category) = self.category {
            item.category = required_text("category", &category, MAX_TITLE_LEN)?;
        }
        if let Some(size) = self.size {
            item.size = required_text("size", &size, MAX_TITLE_LEN)?;
        }
        if let Some(condition) = self.condition {
            item.condition = condition;
        }
        if let Some(tags) = self.tags {
            item.tags = normalize_tags(tags)?;
        }
        if let Some(points) = self.points_required {
            item.points_required = validate_points(points)?;
        }
        Ok(())
    }
}

pub fn validate_points(points: Points) -> Result<Points, ExchangeError> {
    if !(MIN_POINTS..=MAX_POINTS).contains(&points) {
        return Err(ExchangeError::validation(
            "points_required",
            format!(
                "{} is outside the allowed range {}-{}",
                points, MIN_POINTS, MAX_POINTS
            ),
        ));
    }
    Ok(points)
}

fn required_text(field: &'static str, value: &str, max_len: usize) -> Result<String, ExchangeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ExchangeError::validation(field, "is required"));
    }
    if trimmed.chars().count() > max_len {
        return Err(ExchangeError::validation(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }
    Ok(trimmed.to_string())
}

fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>, ExchangeError> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    if out.len() > MAX_TAGS {
        return Err(ExchangeError::validation(
            "tags",
            format!("at most {} tags allowed", MAX_TAGS),
        ));
    }
    Ok(out)
}
