//! Item Entity
//!
//! A lost-or-found report. `item_type` is fixed at creation; `status`
//! starts at the matching value and can only move to `Reunited`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{DomainError, DomainResult};
use super::item_id::ItemId;

/// Whether the reporter lost or found the item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Lost,
    Found,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Lost => "lost",
            ItemType::Found => "found",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lost" => Some(ItemType::Lost),
            "found" => Some(ItemType::Found),
            _ => None,
        }
    }

    /// Status a freshly reported item starts in
    pub fn initial_status(&self) -> ItemStatus {
        match self {
            ItemType::Lost => ItemStatus::Lost,
            ItemType::Found => ItemStatus::Found,
        }
    }
}

/// Lifecycle status: `lost -> reunited` or `found -> reunited`, nothing else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Lost,
    Found,
    Reunited,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Lost => "lost",
            ItemStatus::Found => "found",
            ItemStatus::Reunited => "reunited",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lost" => Some(ItemStatus::Lost),
            "found" => Some(ItemStatus::Found),
            "reunited" => Some(ItemStatus::Reunited),
            _ => None,
        }
    }

    pub fn is_reunited(&self) -> bool {
        matches!(self, ItemStatus::Reunited)
    }

    /// Only `Reunited` is a valid target. Re-asserting it on a reunited
    /// item is allowed, so the mutation is idempotent.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        next == ItemStatus::Reunited
    }
}

/// Fixed set of report categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Electronics,
    Keys,
    Books,
    Clothing,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Electronics,
        Category::Keys,
        Category::Books,
        Category::Clothing,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Electronics => "Electronics",
            Category::Keys => "Keys",
            Category::Books => "Books",
            Category::Clothing => "Clothing",
            Category::Other => "Other",
        }
    }

    /// Unknown names fall back to `Other`
    pub fn from_name(s: &str) -> Self {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .unwrap_or(Category::Other)
    }
}

/// A lost/found report as the board displays it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub location: String,
    /// Phone number or email; hidden from non-owners until revealed
    pub contact: String,
    pub university: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub image_url: String,
    /// Set once by the tag generator, never recomputed
    pub tags: Vec<String>,
    /// Reporter's email, the ownership key
    pub reported_by: String,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Build the full item from a draft plus the values the pipeline resolves
    pub fn from_draft(
        id: ItemId,
        draft: ItemDraft,
        reported_by: String,
        created_at: DateTime<Utc>,
        tags: Vec<String>,
        image_url: String,
    ) -> Self {
        Self {
            id,
            status: draft.item_type.initial_status(),
            title: draft.title,
            description: draft.description,
            category: draft.category,
            location: draft.location,
            contact: draft.contact,
            university: draft.university,
            item_type: draft.item_type,
            image_url,
            tags,
            reported_by,
            created_at,
        }
    }

    pub fn is_reunited(&self) -> bool {
        self.status.is_reunited()
    }
}

impl AsRef<Item> for Item {
    fn as_ref(&self) -> &Item {
        self
    }
}

/// Fields the reporter fills in. Everything else is resolved at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub location: String,
    pub contact: String,
    pub university: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
}

impl ItemDraft {
    pub const MIN_TITLE: usize = 2;
    pub const MIN_DESCRIPTION: usize = 10;
    pub const MIN_LOCATION: usize = 2;
    pub const MIN_CONTACT: usize = 5;

    /// Check the same minimum lengths the report form enforces
    pub fn validate(&self) -> DomainResult<()> {
        check_len("title", &self.title, Self::MIN_TITLE)?;
        check_len("description", &self.description, Self::MIN_DESCRIPTION)?;
        check_len("location", &self.location, Self::MIN_LOCATION)?;
        check_len("contact", &self.contact, Self::MIN_CONTACT)?;
        if self.university.trim().is_empty() {
            return Err(DomainError::InvalidInput("university is required".to_string()));
        }
        Ok(())
    }
}

fn check_len(field: &str, value: &str, min: usize) -> DomainResult<()> {
    if value.trim().chars().count() < min {
        return Err(DomainError::InvalidInput(format!(
            "{} must be at least {} characters",
            field, min
        )));
    }
    Ok(())
}
