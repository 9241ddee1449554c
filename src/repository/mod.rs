//! Repository Layer
//!
//! Contracts for the external collaborators (document store with live
//! feed, blob storage) and the adapters that implement them.

mod blob;
mod feed;
mod memory;
mod record;
mod sqlite;
mod traits;


pub use blob::{blob_key, BlobError, FsBlobStore, MemoryBlobStore};
pub use feed::FeedHub;
pub use memory::MemoryItemStore;
pub use record::{FeedTimestamp, ItemDocument, StoredItem};
pub use sqlite::SqliteItemStore;
pub use traits::{BlobStore, FeedEvent, FeedSubscription, ItemRepository, LiveFeed};
