//! Repository Layer - Core Traits
//!
//! Abstract interfaces for the item store, its live feed and blob storage.
//! Implementations can be SQLite, in-memory, or a hosted service.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::blob::BlobError;
use super::record::{ItemDocument, StoredItem};
use crate::domain::{DomainError, DomainResult, ItemId, ItemStatus};

/// Write side of the item collection
///
/// Records are validated at this boundary, so an authorization layer can
/// be added here later without reshaping the data model.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    /// Persist a new record. The store assigns the id.
    async fn create(&self, doc: &ItemDocument) -> DomainResult<ItemId>;

    /// Find a record by id
    async fn find_by_id(&self, id: &ItemId) -> DomainResult<Option<StoredItem>>;

    /// Partial update of the `status` field only
    async fn update_status(&self, id: &ItemId, status: ItemStatus) -> DomainResult<()>;
}

/// Push-based feed of the whole collection, newest first
#[async_trait]
pub trait LiveFeed: Send + Sync {
    /// Open a subscription. The current snapshot is delivered first.
    async fn subscribe(&self) -> DomainResult<FeedSubscription>;
}

/// Blob storage for item photos
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under `key` and return a durable URL
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, BlobError>;
}

/// One message from the live feed
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Full ordered snapshot (by `createdAt` descending)
    Snapshot(Vec<StoredItem>),
    /// Connectivity or permission failure; no more events follow
    Error(DomainError),
}

/// Receiving end of a feed subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct FeedSubscription {
    rx: mpsc::UnboundedReceiver<FeedEvent>,
}

impl FeedSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<FeedEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the feed side has gone away
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }
}
