//! Stored item documents
//!
//! The store keeps `createdAt` as a (seconds, nanos) timestamp; the feed
//! consumer converts it to a native `DateTime<Utc>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::domain::{Category, DomainError, DomainResult, Item, ItemId, ItemStatus, ItemType};

/// Platform timestamp as stored in the document database
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeedTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl FeedTimestamp {
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos(),
        }
    }

    pub fn to_datetime(&self) -> DomainResult<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.seconds, self.nanos).ok_or_else(|| {
            DomainError::InvalidInput(format!(
                "timestamp out of range: {}s {}ns",
                self.seconds, self.nanos
            ))
        })
    }
}

/// Document body of an item (everything except the id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDocument {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub location: String,
    pub contact: String,
    pub university: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub status: ItemStatus,
    pub image_url: String,
    pub tags: Vec<String>,
    pub reported_by: String,
    pub created_at: FeedTimestamp,
}

impl ItemDocument {
    pub fn from_item(item: &Item) -> Self {
        Self {
            title: item.title.clone(),
            description: item.description.clone(),
            category: item.category,
            location: item.location.clone(),
            contact: item.contact.clone(),
            university: item.university.clone(),
            item_type: item.item_type,
            status: item.status,
            image_url: item.image_url.clone(),
            tags: item.tags.clone(),
            reported_by: item.reported_by.clone(),
            created_at: FeedTimestamp::from_datetime(&item.created_at),
        }
    }

    /// Checks applied to every new record at the store boundary
    pub fn validate_new(&self) -> DomainResult<()> {
        if self.university.trim().is_empty() {
            return Err(DomainError::InvalidInput("university is required".to_string()));
        }
        if self.reported_by.trim().is_empty() {
            return Err(DomainError::InvalidInput("reportedBy is required".to_string()));
        }
        if self.status != self.item_type.initial_status() {
            return Err(DomainError::InvalidInput(format!(
                "new {} item cannot start as {}",
                self.item_type.as_str(),
                self.status.as_str()
            )));
        }
        self.created_at.to_datetime()?;
        Ok(())
    }
}

/// A document together with its store-assigned id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: ItemId,
    #[serde(flatten)]
    pub doc: ItemDocument,
}

impl StoredItem {
    pub fn new(id: ItemId, doc: ItemDocument) -> Self {
        Self { id, doc }
    }

    /// Translate into the native item, converting the timestamp
    pub fn to_item(&self) -> DomainResult<Item> {
        let doc = &self.doc;
        Ok(Item {
            id: self.id.clone(),
            title: doc.title.clone(),
            description: doc.description.clone(),
            category: doc.category,
            location: doc.location.clone(),
            contact: doc.contact.clone(),
            university: doc.university.clone(),
            item_type: doc.item_type,
            status: doc.status,
            image_url: doc.image_url.clone(),
            tags: doc.tags.clone(),
            reported_by: doc.reported_by.clone(),
            created_at: doc.created_at.to_datetime()?,
        })
    }

    /// Feed order: newest first, ties broken by id so the order is total
    pub fn feed_order(a: &StoredItem, b: &StoredItem) -> Ordering {
        b.doc
            .created_at
            .cmp(&a.doc.created_at)
            .then_with(|| b.id.cmp(&a.id))
    }
}
