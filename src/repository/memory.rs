//! In-memory item store
//!
//! Implements the write side and the live feed in-process. Every change
//! publishes a full, ordered snapshot to all subscribers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::feed::FeedHub;
use super::record::{ItemDocument, StoredItem};
use super::traits::{FeedSubscription, ItemRepository, LiveFeed};
use crate::domain::{DomainError, DomainResult, Item, ItemId, ItemStatus};

#[derive(Debug, Default)]
pub struct MemoryItemStore {
    records: Mutex<Vec<StoredItem>>,
    hub: FeedHub,
    fail_writes: AtomicBool,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with existing items (ids are kept)
    pub fn with_items(items: &[Item]) -> Self {
        let mut records: Vec<StoredItem> = items
            .iter()
            .map(|item| StoredItem::new(item.id.clone(), ItemDocument::from_item(item)))
            .collect();
        records.sort_by(StoredItem::feed_order);
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Make every write fail with `Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Drop all subscribers with a connectivity error
    pub fn disconnect_subscribers(&self, reason: &str) {
        self.hub.fail_all(DomainError::Unavailable(reason.to_string()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Current contents in feed order
    pub fn snapshot(&self) -> Vec<StoredItem> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> DomainResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DomainError::Unavailable("item store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemRepository for MemoryItemStore {
    async fn create(&self, doc: &ItemDocument) -> DomainResult<ItemId> {
        self.check_writable()?;
        doc.validate_new()?;

        let id = ItemId::generate();
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(StoredItem::new(id.clone(), doc.clone()));
        records.sort_by(StoredItem::feed_order);
        self.hub.publish(&records);
        Ok(id)
    }

    async fn find_by_id(&self, id: &ItemId) -> DomainResult<Option<StoredItem>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().find(|r| &r.id == id).cloned())
    }

    async fn update_status(&self, id: &ItemId, status: ItemStatus) -> DomainResult<()> {
        self.check_writable()?;

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| DomainError::NotFound(format!("item {}", id)))?;

        if !record.doc.status.can_transition_to(status) {
            return Err(DomainError::InvalidInput(format!(
                "cannot move item {} from {} to {}",
                id,
                record.doc.status.as_str(),
                status.as_str()
            )));
        }
        if record.doc.status == status {
            return Ok(());
        }

        record.doc.status = status;
        self.hub.publish(&records);
        Ok(())
    }
}

#[async_trait]
impl LiveFeed for MemoryItemStore {
    async fn subscribe(&self) -> DomainResult<FeedSubscription> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.hub.subscribe(records.clone()))
    }
}
