//! Subscriber fan-out shared by the store adapters

use std::sync::Mutex;
use tokio::sync::mpsc;

use super::record::StoredItem;
use super::traits::{FeedEvent, FeedSubscription};
use crate::domain::DomainError;

/// Keeps the senders of every open subscription
#[derive(Debug, Default)]
pub struct FeedHub {
    senders: Mutex<Vec<mpsc::UnboundedSender<FeedEvent>>>,
}

impl FeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and hand it `initial` right away
    pub fn subscribe(&self, initial: Vec<StoredItem>) -> FeedSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(FeedEvent::Snapshot(initial));
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        FeedSubscription::new(rx)
    }

    /// Push a snapshot to every live subscriber, forgetting closed ones
    pub fn publish(&self, snapshot: &[StoredItem]) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|tx| tx.send(FeedEvent::Snapshot(snapshot.to_vec())).is_ok());
    }

    /// Terminate every subscription with an error
    pub fn fail_all(&self, error: DomainError) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        for tx in senders.drain(..) {
            let _ = tx.send(FeedEvent::Error(error.clone()));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}
