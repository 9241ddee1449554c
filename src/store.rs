//! Item Store Sync
//!
//! Owns the session's item list. A background task follows the store's
//! live feed and replaces the whole list on every push; readers always get
//! a complete snapshot (`Arc`), never a half-applied update.
//!
//! Optimistic entries from the submission pipeline live next to the
//! committed ones as `ListedItem::Pending` until the feed delivers the
//! matching committed record.

use chrono::Duration;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{DomainError, Item, ItemId, ItemStatus};
use crate::repository::{FeedEvent, FeedSubscription, ItemRepository, LiveFeed, StoredItem};

/// Feed failures. Reported on the snapshot, never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("could not subscribe to the item feed: {0}")]
    Subscribe(DomainError),
    #[error("lost connection to the item feed: {0}")]
    Disconnected(DomainError),
    #[error("the item feed closed")]
    Closed,
}

/// A locally constructed item that is not yet durable
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    /// Temporary id (`pending-N`), also stored in `item.id`
    pub temp_id: ItemId,
    pub item: Item,
    /// Durable id, once persistence has returned it
    pub committed_id: Option<ItemId>,
}

impl PendingItem {
    /// Same author, same content, created within `window` of each other
    fn matches_content(&self, committed: &Item, window: Duration) -> bool {
        let local = &self.item;
        local.reported_by == committed.reported_by
            && local.title == committed.title
            && local.description == committed.description
            && local.item_type == committed.item_type
            && local.university == committed.university
            && (committed.created_at - local.created_at).abs() <= window
    }
}

/// One entry of the displayed list
#[derive(Debug, Clone, PartialEq)]
pub enum ListedItem {
    Pending(PendingItem),
    Committed(Item),
}

impl ListedItem {
    pub fn item(&self) -> &Item {
        match self {
            ListedItem::Pending(p) => &p.item,
            ListedItem::Committed(item) => item,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ListedItem::Pending(_))
    }
}

impl AsRef<Item> for ListedItem {
    fn as_ref(&self) -> &Item {
        self.item()
    }
}

/// Immutable view handed to readers
#[derive(Debug, Clone, Default)]
pub struct ItemSnapshot {
    /// Pending entries (newest first), then committed entries in feed order
    pub entries: Arc<Vec<ListedItem>>,
    /// Set when the feed failed; the list is stale until resubscribed
    pub error: Option<SubscriptionError>,
    /// Incremented on every published change
    pub version: u64,
}

impl ItemSnapshot {
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.entries.iter().map(ListedItem::item)
    }

    pub fn find(&self, id: &ItemId) -> Option<&ListedItem> {
        self.entries.iter().find(|e| &e.item().id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
struct SyncState {
    committed: Vec<Item>,
    pending: Vec<PendingItem>,
    error: Option<SubscriptionError>,
    version: u64,
    next_temp: u64,
}

struct SyncInner {
    feed: Arc<dyn LiveFeed>,
    repo: Arc<dyn ItemRepository>,
    reconcile_window: Duration,
    state: Mutex<SyncState>,
    view_tx: watch::Sender<ItemSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the session's item list. Cheap to clone.
#[derive(Clone)]
pub struct ItemStoreSync {
    inner: Arc<SyncInner>,
}

impl ItemStoreSync {
    pub fn new(
        feed: Arc<dyn LiveFeed>,
        repo: Arc<dyn ItemRepository>,
        reconcile_window: Duration,
    ) -> Self {
        let (view_tx, _) = watch::channel(ItemSnapshot::default());
        Self {
            inner: Arc::new(SyncInner {
                feed,
                repo,
                reconcile_window,
                state: Mutex::new(SyncState::default()),
                view_tx,
                task: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to the live feed. Calling it again after a failure
    /// resubscribes (the "reload" path); while running it is a no-op.
    pub async fn start(&self) -> Result<(), SubscriptionError> {
        if self.is_running() && self.snapshot().error.is_none() {
            return Ok(());
        }
        // A failed feed task may still be winding down.
        if let Some(stale) = self.inner.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            stale.abort();
        }

        let subscription = match self.inner.feed.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "item feed subscription failed");
                let err = SubscriptionError::Subscribe(e);
                self.inner.report_error(err.clone());
                return Err(err);
            }
        };

        self.inner.clear_error();
        let handle = tokio::spawn(run_feed(Arc::downgrade(&self.inner), subscription));
        *self.inner.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!("item feed subscribed");
        Ok(())
    }

    /// Tear down the subscription
    pub fn stop(&self) {
        if let Some(handle) = self.inner.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
            info!("item feed unsubscribed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        self.inner.view_tx.borrow().clone()
    }

    /// Change notifications for the displayed list
    pub fn watch(&self) -> watch::Receiver<ItemSnapshot> {
        self.inner.view_tx.subscribe()
    }

    /// Fire-and-forget status mutation. The feed reflects the result;
    /// the returned handle may be dropped.
    pub fn update_status(&self, id: &ItemId, status: ItemStatus) -> JoinHandle<()> {
        let repo = Arc::clone(&self.inner.repo);
        let id = id.clone();
        tokio::spawn(async move {
            match repo.update_status(&id, status).await {
                Ok(()) => info!(item = %id, status = status.as_str(), "status updated"),
                Err(e) => error!(item = %id, error = %e, "status update failed"),
            }
        })
    }

    /// Show `item` optimistically. Returns the temporary id.
    pub fn add_pending(&self, mut item: Item) -> ItemId {
        let mut state = self.inner.lock_state();
        state.next_temp += 1;
        let temp_id = ItemId::new(format!("pending-{}", state.next_temp));
        item.id = temp_id.clone();
        state.pending.push(PendingItem {
            temp_id: temp_id.clone(),
            item,
            committed_id: None,
        });
        debug!(temp = %temp_id, "optimistic item added");
        self.inner.publish(&mut state);
        temp_id
    }

    /// Record the durable id of a pending item. If the feed already
    /// delivered it, the pending copy is dropped right away.
    pub fn confirm_pending(&self, temp_id: &ItemId, committed_id: ItemId) {
        let mut state = self.inner.lock_state();
        if let Some(p) = state.pending.iter_mut().find(|p| &p.temp_id == temp_id) {
            p.committed_id = Some(committed_id);
        }
        self.inner.reconcile(&mut state);
        self.inner.publish(&mut state);
    }

    /// Remove a pending item after its submission failed
    pub fn discard_pending(&self, temp_id: &ItemId) {
        let mut state = self.inner.lock_state();
        let before = state.pending.len();
        state.pending.retain(|p| &p.temp_id != temp_id);
        if state.pending.len() != before {
            debug!(temp = %temp_id, "optimistic item discarded");
            self.inner.publish(&mut state);
        }
    }
}

impl Drop for ItemStoreSync {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.stop();
        }
    }
}

impl SyncInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the committed list with a fresh feed snapshot
    fn apply_snapshot(&self, records: Vec<StoredItem>) {
        let mut committed = Vec::with_capacity(records.len());
        for record in &records {
            match record.to_item() {
                Ok(item) => committed.push(item),
                Err(e) => warn!(item = %record.id, error = %e, "skipping unreadable feed record"),
            }
        }

        let mut state = self.lock_state();
        state.committed = committed;
        state.error = None;
        self.reconcile(&mut state);
        self.publish(&mut state);
    }

    fn report_error(&self, err: SubscriptionError) {
        let mut state = self.lock_state();
        state.error = Some(err);
        self.publish(&mut state);
    }

    fn clear_error(&self) {
        let mut state = self.lock_state();
        if state.error.take().is_some() {
            self.publish(&mut state);
        }
    }

    /// Drop pending copies that the committed list now covers.
    ///
    /// Pass 1 matches by durable id. Pass 2 matches the remaining pending
    /// items by content, oldest pending first, each committed item
    /// absorbing at most one pending copy.
    fn reconcile(&self, state: &mut SyncState) {
        let mut claimed: HashSet<ItemId> = HashSet::new();
        let committed = &state.committed;

        state.pending.retain(|p| match &p.committed_id {
            Some(id) if committed.iter().any(|c| &c.id == id) => {
                claimed.insert(id.clone());
                debug!(temp = %p.temp_id, item = %id, "pending item committed");
                false
            }
            _ => true,
        });

        let window = self.reconcile_window;
        state.pending.retain(|p| {
            if p.committed_id.is_some() {
                return true;
            }
            let found = committed
                .iter()
                .find(|c| !claimed.contains(&c.id) && p.matches_content(c, window));
            match found {
                Some(c) => {
                    claimed.insert(c.id.clone());
                    debug!(temp = %p.temp_id, item = %c.id, "pending item matched by content");
                    false
                }
                None => true,
            }
        });
    }

    fn publish(&self, state: &mut SyncState) {
        state.version += 1;
        let entries: Vec<ListedItem> = state
            .pending
            .iter()
            .rev()
            .cloned()
            .map(ListedItem::Pending)
            .chain(state.committed.iter().cloned().map(ListedItem::Committed))
            .collect();
        self.view_tx.send_replace(ItemSnapshot {
            entries: Arc::new(entries),
            error: state.error.clone(),
            version: state.version,
        });
    }
}

async fn run_feed(inner: Weak<SyncInner>, mut subscription: FeedSubscription) {
    while let Some(event) = subscription.recv().await {
        let Some(shared) = inner.upgrade() else {
            return;
        };
        match event {
            FeedEvent::Snapshot(records) => {
                debug!(count = records.len(), "feed snapshot received");
                shared.apply_snapshot(records);
            }
            FeedEvent::Error(e) => {
                warn!(error = %e, "item feed failed; reload to resubscribe");
                shared.report_error(SubscriptionError::Disconnected(e));
                return;
            }
        }
    }

    if let Some(shared) = inner.upgrade() {
        warn!("item feed closed");
        shared.report_error(SubscriptionError::Closed);
    }
}
