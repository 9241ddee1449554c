//! Shared fakes and fixtures for unit tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::{Category, Item, ItemDraft, ItemId, ItemType, User};
use crate::store::{ItemSnapshot, ItemStoreSync};
use crate::tagging::{TagGenerationError, TagGenerator, TagRequest};

/// Tag generator with a canned answer that records every request
pub struct FakeTagGenerator {
    result: Result<Vec<String>, TagGenerationError>,
    calls: Mutex<Vec<TagRequest>>,
}

impl FakeTagGenerator {
    pub fn returning(tags: &[&str]) -> Self {
        Self {
            result: Ok(tags.iter().map(|t| t.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err(TagGenerationError::Service {
                status: 503,
                body: "model unavailable".to_string(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<TagRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TagGenerator for FakeTagGenerator {
    async fn generate_tags(&self, request: &TagRequest) -> Result<Vec<String>, TagGenerationError> {
        self.calls.lock().unwrap().push(request.clone());
        self.result.clone()
    }
}

pub fn sample_user(email: &str, university: &str) -> User {
    User::new("uid-1", "Sam Student", email, university)
}

pub fn sample_draft(title: &str, item_type: ItemType, university: &str) -> ItemDraft {
    ItemDraft {
        title: title.to_string(),
        description: format!("{} described at length", title.to_lowercase()),
        category: Category::Other,
        location: "Library, 2nd Floor".to_string(),
        contact: "555-0101".to_string(),
        university: university.to_string(),
        item_type,
    }
}

/// Committed-looking item created at `seconds` after the epoch
pub fn sample_item(title: &str, item_type: ItemType, university: &str, reported_by: &str, seconds: i64) -> Item {
    Item::from_draft(
        ItemId::generate(),
        sample_draft(title, item_type, university),
        reported_by.to_string(),
        Utc.timestamp_opt(seconds, 0).unwrap(),
        vec![title.to_lowercase()],
        "https://placehold.co/600x400.png".to_string(),
    )
}

/// Wait (bounded) until the published snapshot satisfies `pred`
pub async fn wait_for<F>(sync: &ItemStoreSync, mut pred: F) -> ItemSnapshot
where
    F: FnMut(&ItemSnapshot) -> bool,
{
    let mut rx = sync.watch();
    let result = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| pred(s))).await;
    match result {
        Ok(Ok(snapshot)) => snapshot.clone(),
        Ok(Err(_)) => panic!("snapshot channel closed"),
        Err(_) => panic!("timed out waiting for snapshot; last: {:?}", sync.snapshot()),
    }
}
