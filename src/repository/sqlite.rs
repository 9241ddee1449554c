//! SQLite item store
//!
//! Durable implementation of `ItemRepository` + `LiveFeed` on rusqlite.
//! `createdAt` is stored as (seconds, nanos); tags as a JSON array.
//! Every statement runs on the blocking pool; writes publish the new
//! snapshot while still holding the connection so subscribers see
//! commits in order.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::feed::FeedHub;
use super::record::{FeedTimestamp, ItemDocument, StoredItem};
use super::traits::{FeedSubscription, ItemRepository, LiveFeed};
use crate::domain::{Category, DomainError, DomainResult, ItemId, ItemStatus, ItemType};

const SELECT_COLUMNS: &str = "SELECT id, title, description, category, location, contact, university, \
     item_type, status, image_url, tags, reported_by, created_seconds, created_nanos FROM items";

pub struct SqliteItemStore {
    conn: Arc<Mutex<Connection>>,
    hub: Arc<FeedHub>,
}

impl SqliteItemStore {
    /// Open (or create) the database at `path` and run migrations
    pub fn open(path: &Path) -> DomainResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| DomainError::Unavailable(format!("Failed to open db: {}", e)))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> DomainResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DomainError::Unavailable(format!("Failed to open db: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> DomainResult<Self> {
        run_migrations(&conn).map_err(|e| DomainError::Internal(format!("Migration failed: {}", e)))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            hub: Arc::new(FeedHub::new()),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> DomainResult<T>
    where
        F: FnOnce(&Connection, &FeedHub) -> DomainResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let hub = Arc::clone(&self.hub);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard, &hub)
        })
        .await
        .map_err(|e| DomainError::Internal(format!("database task failed: {}", e)))?
    }
}

/// Run database migrations
fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            location TEXT NOT NULL,
            contact TEXT NOT NULL,
            university TEXT NOT NULL,
            item_type TEXT NOT NULL,
            status TEXT NOT NULL,
            image_url TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            reported_by TEXT NOT NULL,
            created_seconds INTEGER NOT NULL,
            created_nanos INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_created ON items(created_seconds DESC, created_nanos DESC)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_university ON items(university)",
        [],
    )?;

    Ok(())
}

/// Raw column values, converted outside the row closure
struct ItemRow {
    id: String,
    title: String,
    description: String,
    category: String,
    location: String,
    contact: String,
    university: String,
    item_type: String,
    status: String,
    image_url: String,
    tags: String,
    reported_by: String,
    created_seconds: i64,
    created_nanos: i64,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        location: row.get(4)?,
        contact: row.get(5)?,
        university: row.get(6)?,
        item_type: row.get(7)?,
        status: row.get(8)?,
        image_url: row.get(9)?,
        tags: row.get(10)?,
        reported_by: row.get(11)?,
        created_seconds: row.get(12)?,
        created_nanos: row.get(13)?,
    })
}

fn row_to_stored(row: ItemRow) -> DomainResult<StoredItem> {
    let item_type = ItemType::parse(&row.item_type)
        .ok_or_else(|| DomainError::Internal(format!("bad item_type '{}'", row.item_type)))?;
    let status = ItemStatus::parse(&row.status)
        .ok_or_else(|| DomainError::Internal(format!("bad status '{}'", row.status)))?;
    let tags: Vec<String> = serde_json::from_str(&row.tags)
        .map_err(|e| DomainError::Internal(format!("bad tags for {}: {}", row.id, e)))?;
    let nanos = u32::try_from(row.created_nanos)
        .map_err(|_| DomainError::Internal(format!("bad created_nanos for {}", row.id)))?;

    Ok(StoredItem::new(
        ItemId::new(row.id),
        ItemDocument {
            title: row.title,
            description: row.description,
            category: Category::from_name(&row.category),
            location: row.location,
            contact: row.contact,
            university: row.university,
            item_type,
            status,
            image_url: row.image_url,
            tags,
            reported_by: row.reported_by,
            created_at: FeedTimestamp::new(row.created_seconds, nanos),
        },
    ))
}

/// Every decodable row, newest first. Undecodable rows are logged and
/// left out so one bad record cannot take the whole feed down.
fn load_all(conn: &Connection) -> DomainResult<Vec<StoredItem>> {
    let query = format!(
        "{} ORDER BY created_seconds DESC, created_nanos DESC, id DESC",
        SELECT_COLUMNS
    );
    let mut stmt = conn
        .prepare(&query)
        .map_err(|e| DomainError::Internal(e.to_string()))?;
    let rows = stmt
        .query_map([], read_row)
        .map_err(|e| DomainError::Internal(e.to_string()))?;

    let mut items = Vec::new();
    for row in rows {
        let decoded = row
            .map_err(|e| DomainError::Internal(e.to_string()))
            .and_then(row_to_stored);
        match decoded {
            Ok(item) => items.push(item),
            Err(e) => warn!(error = %e, "skipping unreadable item row"),
        }
    }
    Ok(items)
}

/// Push the current table to subscribers. The write has already
/// committed, so a failed reload is logged rather than returned.
fn publish_snapshot(conn: &Connection, hub: &FeedHub) {
    match load_all(conn) {
        Ok(snapshot) => hub.publish(&snapshot),
        Err(e) => warn!(error = %e, "item snapshot not published"),
    }
}

fn load_one(conn: &Connection, id: &ItemId) -> DomainResult<Option<StoredItem>> {
    let query = format!("{} WHERE id = ?1", SELECT_COLUMNS);
    let row = conn
        .query_row(&query, params![id.as_str()], read_row)
        .optional()
        .map_err(|e| DomainError::Internal(e.to_string()))?;
    row.map(row_to_stored).transpose()
}

fn insert(conn: &Connection, id: &ItemId, doc: &ItemDocument) -> DomainResult<()> {
    let tags = serde_json::to_string(&doc.tags).map_err(|e| DomainError::Internal(e.to_string()))?;
    conn.execute(
        "INSERT INTO items (id, title, description, category, location, contact, university, \
         item_type, status, image_url, tags, reported_by, created_seconds, created_nanos) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            id.as_str(),
            doc.title,
            doc.description,
            doc.category.as_str(),
            doc.location,
            doc.contact,
            doc.university,
            doc.item_type.as_str(),
            doc.status.as_str(),
            doc.image_url,
            tags,
            doc.reported_by,
            doc.created_at.seconds,
            i64::from(doc.created_at.nanos),
        ],
    )
    .map_err(|e| DomainError::Internal(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl ItemRepository for SqliteItemStore {
    async fn create(&self, doc: &ItemDocument) -> DomainResult<ItemId> {
        doc.validate_new()?;

        let doc = doc.clone();
        self.with_conn(move |conn, hub| {
            let id = ItemId::generate();
            insert(conn, &id, &doc)?;
            publish_snapshot(conn, hub);
            Ok(id)
        })
        .await
    }

    async fn find_by_id(&self, id: &ItemId) -> DomainResult<Option<StoredItem>> {
        let id = id.clone();
        self.with_conn(move |conn, _| load_one(conn, &id)).await
    }

    async fn update_status(&self, id: &ItemId, status: ItemStatus) -> DomainResult<()> {
        let id = id.clone();
        self.with_conn(move |conn, hub| {
            let current = load_one(conn, &id)?
                .ok_or_else(|| DomainError::NotFound(format!("item {}", id)))?;
            if !current.doc.status.can_transition_to(status) {
                return Err(DomainError::InvalidInput(format!(
                    "cannot move item {} from {} to {}",
                    id,
                    current.doc.status.as_str(),
                    status.as_str()
                )));
            }
            if current.doc.status == status {
                return Ok(());
            }

            conn.execute(
                "UPDATE items SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.as_str()],
            )
            .map_err(|e| DomainError::Internal(e.to_string()))?;

            publish_snapshot(conn, hub);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LiveFeed for SqliteItemStore {
    async fn subscribe(&self) -> DomainResult<FeedSubscription> {
        self.with_conn(|conn, hub| {
            let snapshot = load_all(conn)?;
            Ok(hub.subscribe(snapshot))
        })
        .await
    }
}
