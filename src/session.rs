//! Session wiring
//!
//! One signed-in user, one item feed subscription, one submission
//! pipeline. The subscription starts with `Session::start` and is torn
//! down by `Session::end`.

use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::domain::{DomainError, ImageFile, ItemDraft, ItemId, User};
use crate::repository::{BlobStore, FsBlobStore, ItemRepository, LiveFeed, SqliteItemStore};
use crate::store::{ItemSnapshot, ItemStoreSync, ListedItem, SubscriptionError};
use crate::submission::{SubmissionOptions, SubmissionPipeline, SubmissionStatus, SubmitError};
use crate::tagging::{HttpTagGenerator, TagGenerator};
use crate::visibility::{self, DashboardView, DetailView, StatusError};

const LOG_NAME: &str = "campus-finds";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("logger setup failed: {0}")]
    Logger(#[from] rolling_logger::LoggerError),
    #[error("item store unavailable: {0}")]
    Storage(#[from] DomainError),
}

/// The external collaborators, shared by every session of the process
#[derive(Clone)]
pub struct Services {
    pub repo: Arc<dyn ItemRepository>,
    pub feed: Arc<dyn LiveFeed>,
    pub blobs: Arc<dyn BlobStore>,
    pub tagger: Arc<dyn TagGenerator>,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self, SessionError> {
        if let Some(parent) = config.storage.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DomainError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        let store = Arc::new(SqliteItemStore::open(&config.storage.database_path)?);
        info!(db = %config.storage.database_path.display(), "item store opened");

        Ok(Self {
            repo: store.clone(),
            feed: store,
            blobs: Arc::new(FsBlobStore::new(
                config.blobs.root.clone(),
                config.blobs.public_base_url.clone(),
            )),
            tagger: Arc::new(HttpTagGenerator::new(
                config.tagging.endpoint.clone(),
                config.tagging.api_key.clone(),
            )),
        })
    }
}

/// Load config (file, then environment), set up logging, open services
pub fn bootstrap(config_path: &Path) -> Result<(Config, Services), SessionError> {
    let mut config = Config::load(config_path)?;
    config.apply_env()?;
    config.validate()?;

    if let Some(dir) = &config.log_dir {
        rolling_logger::init_logger(dir.clone(), LOG_NAME)?;
        let _ = rolling_logger::info("logger ready");
    }

    let services = Services::from_config(&config)?;
    Ok((config, services))
}

fn submission_options(config: &Config) -> SubmissionOptions {
    SubmissionOptions {
        placeholder_image_url: config.placeholder_image_url.clone(),
        require_photo: config.require_photo,
    }
}

pub struct Session {
    user: User,
    sync: ItemStoreSync,
    pipeline: SubmissionPipeline,
}

impl Session {
    /// Subscribe to the item feed for `user`. A failed subscription does
    /// not fail the session; it shows up on `items().error`.
    pub async fn start(user: User, services: &Services, config: &Config) -> Self {
        let sync = ItemStoreSync::new(
            services.feed.clone(),
            services.repo.clone(),
            config.reconcile_window(),
        );
        if let Err(e) = sync.start().await {
            warn!(user = %user.email, error = %e, "session started without item feed");
        }
        let pipeline = SubmissionPipeline::new(
            sync.clone(),
            services.repo.clone(),
            services.blobs.clone(),
            services.tagger.clone(),
            submission_options(config),
        );
        info!(user = %user.email, university = %user.university, "session started");
        Self { user, sync, pipeline }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn items(&self) -> ItemSnapshot {
        self.sync.snapshot()
    }

    pub fn store(&self) -> &ItemStoreSync {
        &self.sync
    }

    /// Lost/found tabs for this user over `snapshot`
    pub fn dashboard<'a>(&self, snapshot: &'a ItemSnapshot, query: &str) -> DashboardView<'a, ListedItem> {
        visibility::dashboard(snapshot.entries.as_slice(), &self.user, query)
    }

    /// Open the detail view of an item from the user's university
    pub fn open_detail(&self, id: &ItemId) -> Option<DetailView> {
        let snapshot = self.sync.snapshot();
        let entry = snapshot.find(id)?;
        if entry.item().university != self.user.university {
            return None;
        }
        Some(DetailView::open(entry.clone()))
    }

    pub async fn submit(&self, draft: ItemDraft, image: Option<ImageFile>) -> Result<ItemId, SubmitError> {
        self.pipeline.submit(Some(&self.user), draft, image).await
    }

    pub fn submission_status(&self) -> SubmissionStatus {
        self.pipeline.status()
    }

    pub fn mark_reunited(&self, view: &DetailView) -> Result<Option<JoinHandle<()>>, StatusError> {
        view.mark_reunited(&self.sync, &self.user)
    }

    /// Resubscribe after a feed failure
    pub async fn reload(&self) -> Result<(), SubscriptionError> {
        self.sync.start().await
    }

    pub fn end(self) {
        self.sync.stop();
        info!(user = %self.user.email, "session ended");
    }
}
