//! Visibility & Status Rules
//!
//! Pure derivations over an item list and the signed-in user, plus the
//! item detail view (per-open contact reveal, the one available action).
//! Functions are generic over `AsRef<Item>` so they work on plain items
//! and on `ListedItem` entries alike.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::{Category, Item, ItemId, ItemStatus, ItemType, User};
use crate::store::{ItemSnapshot, ItemStoreSync, ListedItem};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error("only the reporter can change the status of this item")]
    NotOwner,
    #[error("cannot move item from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition { from: ItemStatus, to: ItemStatus },
    #[error("item {0} is not saved yet")]
    NotFound(ItemId),
}

/// Items belonging to the user's university
pub fn scope_to_university<'a, T, I>(items: I, user: &User) -> Vec<&'a T>
where
    T: AsRef<Item> + 'a,
    I: IntoIterator<Item = &'a T>,
{
    items
        .into_iter()
        .filter(|i| i.as_ref().university == user.university)
        .collect()
}

/// Case-insensitive substring match on title, description, category or
/// any tag. An empty query keeps everything.
pub fn filter_by_search<'a, T, I>(items: I, query: &str) -> Vec<&'a T>
where
    T: AsRef<Item> + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return items.into_iter().collect();
    }
    items
        .into_iter()
        .filter(|i| matches_query(i.as_ref(), &needle))
        .collect()
}

fn matches_query(item: &Item, needle: &str) -> bool {
    let contains = |text: &str| text.to_lowercase().contains(needle);
    contains(&item.title)
        || contains(&item.description)
        || contains(item.category.as_str())
        || item.tags.iter().any(|t| contains(t))
}

/// Split into (lost, found) tabs. Reunited items land in neither.
pub fn partition<'a, T, I>(items: I) -> (Vec<&'a T>, Vec<&'a T>)
where
    T: AsRef<Item> + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut lost = Vec::new();
    let mut found = Vec::new();
    for entry in items {
        let item = entry.as_ref();
        match (item.item_type, item.status) {
            (ItemType::Lost, ItemStatus::Lost) => lost.push(entry),
            (ItemType::Found, ItemStatus::Found) => found.push(entry),
            _ => {}
        }
    }
    (lost, found)
}

pub fn is_owner(item: &Item, user: &User) -> bool {
    item.reported_by == user.email
}

/// `revealed` is the viewer's per-open reveal flag
pub fn can_see_contact(item: &Item, user: &User, revealed: bool) -> bool {
    is_owner(item, user) || revealed
}

/// Check that `user` may move `item` to `next`
pub fn check_status_change(item: &Item, user: &User, next: ItemStatus) -> Result<(), StatusError> {
    if !is_owner(item, user) {
        return Err(StatusError::NotOwner);
    }
    if !item.status.can_transition_to(next) {
        return Err(StatusError::InvalidTransition {
            from: item.status,
            to: next,
        });
    }
    Ok(())
}

/// Mark an item reunited on behalf of its reporter.
///
/// Returns the handle of the fire-and-forget write, or `None` when the
/// item is already reunited. Non-owners get `StatusError::NotOwner` and
/// nothing is written.
pub fn mark_reunited(
    store: &ItemStoreSync,
    entry: &ListedItem,
    user: &User,
) -> Result<Option<JoinHandle<()>>, StatusError> {
    let item = entry.item();
    if let Err(e) = check_status_change(item, user, ItemStatus::Reunited) {
        warn!(item = %item.id, user = %user.email, error = %e, "status change refused");
        return Err(e);
    }
    if entry.is_pending() {
        return Err(StatusError::NotFound(item.id.clone()));
    }
    if item.is_reunited() {
        return Ok(None);
    }
    info!(item = %item.id, "marking item reunited");
    Ok(Some(store.update_status(&item.id, ItemStatus::Reunited)))
}

/// The two dashboard tabs after scoping and searching
#[derive(Debug, PartialEq)]
pub struct DashboardView<'a, T> {
    pub lost: Vec<&'a T>,
    pub found: Vec<&'a T>,
}

/// scope -> search -> partition
pub fn dashboard<'a, T: AsRef<Item>>(items: &'a [T], user: &User, query: &str) -> DashboardView<'a, T> {
    let scoped = scope_to_university(items, user);
    let searched = filter_by_search(scoped, query);
    let (lost, found) = partition(searched);
    DashboardView { lost, found }
}

/// What the detail view offers below the contact card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailAction {
    /// Owner, item still open
    MarkReunited,
    /// Owner, item already reunited (disabled)
    AlreadyReunited,
    /// Non-owner who has not revealed the contact yet
    RevealContact { label: &'static str },
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailRender {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub location: String,
    pub image_url: String,
    pub tags: Vec<String>,
    pub status_label: &'static str,
    /// Present only for the owner or after an explicit reveal
    pub contact: Option<String>,
    pub university: String,
    pub action: DetailAction,
    pub pending: bool,
}

/// One opening of the item detail view. The reveal flag lives and dies
/// with it; reopening starts hidden again.
#[derive(Debug, Clone)]
pub struct DetailView {
    entry: ListedItem,
    revealed: bool,
}

impl DetailView {
    pub fn open(entry: ListedItem) -> Self {
        Self {
            entry,
            revealed: false,
        }
    }

    pub fn item(&self) -> &Item {
        self.entry.item()
    }

    /// One-way: there is no way to hide it again within this view
    pub fn reveal_contact(&mut self) {
        self.revealed = true;
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    /// Follow the latest snapshot. Returns false when the item is gone.
    pub fn refresh(&mut self, snapshot: &ItemSnapshot) -> bool {
        match snapshot.find(&self.entry.item().id) {
            Some(entry) => {
                self.entry = entry.clone();
                true
            }
            None => false,
        }
    }

    pub fn mark_reunited(
        &self,
        store: &ItemStoreSync,
        user: &User,
    ) -> Result<Option<JoinHandle<()>>, StatusError> {
        mark_reunited(store, &self.entry, user)
    }

    pub fn render(&self, user: &User) -> DetailRender {
        let item = self.entry.item();
        let owner = is_owner(item, user);

        let status_label = match (item.status, item.item_type) {
            (ItemStatus::Reunited, _) => "Reunited",
            (_, ItemType::Lost) => "Lost",
            (_, ItemType::Found) => "Found",
        };

        let action = if owner && item.is_reunited() {
            DetailAction::AlreadyReunited
        } else if owner {
            DetailAction::MarkReunited
        } else if !self.revealed {
            let label = match item.item_type {
                ItemType::Found => "Contact Finder",
                ItemType::Lost => "Contact Owner",
            };
            DetailAction::RevealContact { label }
        } else {
            DetailAction::None
        };

        DetailRender {
            title: item.title.clone(),
            description: item.description.clone(),
            category: item.category,
            location: item.location.clone(),
            image_url: item.image_url.clone(),
            tags: item.tags.clone(),
            status_label,
            contact: can_see_contact(item, user, self.revealed).then(|| item.contact.clone()),
            university: item.university.clone(),
            action,
            pending: self.entry.is_pending(),
        }
    }

    /// Close the view, dropping the reveal flag
    pub fn close(self) -> ListedItem {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{ItemRepository, MemoryItemStore};
    use crate::testing::{sample_item, sample_user, wait_for};
    use chrono::Duration;
    use std::sync::Arc;

    fn board() -> Vec<Item> {
        let mut reunited = sample_item("Blue Umbrella", ItemType::Found, "State", "c@state.edu", 3);
        reunited.status = ItemStatus::Reunited;
        vec![
            sample_item("Black Leather Wallet", ItemType::Lost, "State", "a@state.edu", 5),
            sample_item("Calculator", ItemType::Found, "State", "b@state.edu", 4),
            reunited,
            sample_item("Keys", ItemType::Lost, "Tech", "d@tech.edu", 2),
        ]
    }

    #[test]
    fn test_scope_keeps_only_own_university() {
        let items = board();
        let user = sample_user("x@state.edu", "State");

        let scoped = scope_to_university(&items, &user);

        assert_eq!(scoped.len(), 3);
        for item in &items {
            let visible = scoped.iter().any(|s| s.id == item.id);
            assert_eq!(visible, item.university == user.university);
        }
    }

    #[test]
    fn test_search_matches_title_and_tags() {
        let mut items = board();
        let mut tagged = sample_item("Brown Billfold", ItemType::Lost, "State", "e@state.edu", 1);
        tagged.description = "found near the gym lockers".to_string();
        tagged.tags = vec!["wallet".to_string(), "brown".to_string()];
        items.push(tagged);

        let hits = filter_by_search(&items, "wallet");
        let titles: Vec<&str> = hits.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Black Leather Wallet", "Brown Billfold"]);

        assert_eq!(filter_by_search(&items, "WALLET").len(), 2);
        assert_eq!(filter_by_search(&items, "other").len(), items.len());
        assert_eq!(filter_by_search(&items, "  ").len(), items.len());
    }

    #[test]
    fn test_partition_excludes_reunited() {
        let items = board();
        let (lost, found) = partition(&items);

        for item in &items {
            let in_lost = lost.iter().any(|i| i.id == item.id);
            let in_found = found.iter().any(|i| i.id == item.id);
            assert_eq!(in_lost, item.item_type == ItemType::Lost && item.status == ItemStatus::Lost);
            assert_eq!(in_found, item.item_type == ItemType::Found && item.status == ItemStatus::Found);
            if item.is_reunited() {
                assert!(!in_lost && !in_found);
            }
        }
    }

    #[test]
    fn test_dashboard_composes_scope_search_partition() {
        let items = board();
        let user = sample_user("x@state.edu", "State");

        let view = dashboard(&items, &user, "");
        assert_eq!(view.lost.len(), 1);
        assert_eq!(view.found.len(), 1);

        let view = dashboard(&items, &user, "keys");
        assert!(view.lost.is_empty());
        assert!(view.found.is_empty());
    }

    #[test]
    fn test_contact_hidden_until_revealed_and_reset_on_reopen() {
        let item = sample_item("Calculator", ItemType::Found, "State", "finder@state.edu", 1);
        let viewer = sample_user("someone@state.edu", "State");

        let mut view = DetailView::open(ListedItem::Committed(item.clone()));
        let render = view.render(&viewer);
        assert_eq!(render.contact, None);
        assert_eq!(render.action, DetailAction::RevealContact { label: "Contact Finder" });

        view.reveal_contact();
        let render = view.render(&viewer);
        assert_eq!(render.contact.as_deref(), Some("555-0101"));
        assert_eq!(render.action, DetailAction::None);

        let reopened = DetailView::open(view.close());
        assert_eq!(reopened.render(&viewer).contact, None);
    }

    #[test]
    fn test_owner_always_sees_contact() {
        let item = sample_item("Keys", ItemType::Lost, "State", "me@state.edu", 1);
        let owner = sample_user("me@state.edu", "State");
        let view = DetailView::open(ListedItem::Committed(item));

        let render = view.render(&owner);
        assert_eq!(render.contact.as_deref(), Some("555-0101"));
        assert_eq!(render.action, DetailAction::MarkReunited);
        assert_eq!(render.status_label, "Lost");
    }

    #[test]
    fn test_reveal_label_for_lost_item() {
        let item = sample_item("Keys", ItemType::Lost, "State", "me@state.edu", 1);
        let viewer = sample_user("other@state.edu", "State");
        let render = DetailView::open(ListedItem::Committed(item)).render(&viewer);
        assert_eq!(render.action, DetailAction::RevealContact { label: "Contact Owner" });
    }

    #[test]
    fn test_check_status_change() {
        let item = sample_item("Keys", ItemType::Lost, "State", "me@state.edu", 1);
        let owner = sample_user("me@state.edu", "State");
        let other = sample_user("you@state.edu", "State");

        assert_eq!(check_status_change(&item, &other, ItemStatus::Reunited), Err(StatusError::NotOwner));
        assert_eq!(
            check_status_change(&item, &owner, ItemStatus::Found),
            Err(StatusError::InvalidTransition {
                from: ItemStatus::Lost,
                to: ItemStatus::Found
            })
        );
        assert!(check_status_change(&item, &owner, ItemStatus::Reunited).is_ok());
    }

    #[tokio::test]
    async fn test_mark_reunited_rejects_non_owner() {
        let item = sample_item("Wallet", ItemType::Lost, "State", "owner@state.edu", 1);
        let store = Arc::new(MemoryItemStore::with_items(&[item.clone()]));
        let sync = ItemStoreSync::new(store.clone(), store.clone(), Duration::seconds(60));
        let stranger = sample_user("stranger@state.edu", "State");

        let result = mark_reunited(&sync, &ListedItem::Committed(item.clone()), &stranger);

        assert!(matches!(result, Err(StatusError::NotOwner)));
        let stored = store.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.doc.status, ItemStatus::Lost);
    }

    #[tokio::test]
    async fn test_mark_reunited_twice_by_owner() {
        let item = sample_item("Wallet", ItemType::Found, "State", "owner@state.edu", 1);
        let store = Arc::new(MemoryItemStore::with_items(&[item.clone()]));
        let sync = ItemStoreSync::new(store.clone(), store.clone(), Duration::seconds(60));
        let owner = sample_user("owner@state.edu", "State");
        sync.start().await.unwrap();
        let snap = wait_for(&sync, |s| s.len() == 1).await;

        let mut view = DetailView::open(snap.entries[0].clone());
        let handle = view.mark_reunited(&sync, &owner).unwrap().expect("write issued");
        handle.await.unwrap();

        let snap = wait_for(&sync, |s| s.len() == 1 && s.items().all(|i| i.is_reunited())).await;
        assert!(view.refresh(&snap));
        assert_eq!(view.render(&owner).action, DetailAction::AlreadyReunited);
        assert_eq!(view.render(&owner).status_label, "Reunited");

        assert!(view.mark_reunited(&sync, &owner).unwrap().is_none());
        let stored = store.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.doc.status, ItemStatus::Reunited);
        assert_eq!(stored.doc.item_type, ItemType::Found);
    }

    #[tokio::test]
    async fn test_mark_reunited_on_pending_item() {
        let store = Arc::new(MemoryItemStore::new());
        let sync = ItemStoreSync::new(store.clone(), store.clone(), Duration::seconds(60));
        let owner = sample_user("owner@state.edu", "State");
        let temp = sync.add_pending(sample_item("Wallet", ItemType::Lost, "State", "owner@state.edu", 1));

        let entry = sync.snapshot().find(&temp).cloned().unwrap();
        assert_eq!(mark_reunited(&sync, &entry, &owner).unwrap_err(), StatusError::NotFound(temp));
    }
}
