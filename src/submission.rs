//! Item Submission Pipeline
//!
//! `submit` runs upload -> tagging -> persistence strictly in sequence.
//! Any failure aborts the whole operation: nothing is persisted and the
//! optimistic copy is withdrawn. A photo uploaded before a later failure
//! stays in blob storage.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::DEFAULT_PLACEHOLDER_IMAGE_URL;
use crate::domain::{DomainError, ImageFile, Item, ItemDraft, ItemId, PhotoPayload, User};
use crate::repository::{blob_key, BlobError, BlobStore, ItemDocument, ItemRepository};
use crate::store::ItemStoreSync;
use crate::tagging::{self, TagGenerationError, TagGenerator};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("not authorized: {0}")]
    Auth(String),
    #[error("a photo is required")]
    MissingImage,
    #[error("photo upload rejected: {0}")]
    UploadPermission(String),
    #[error("photo upload failed: {0}")]
    Upload(String),
    #[error(transparent)]
    TagGeneration(#[from] TagGenerationError),
    #[error("could not save the report: {0}")]
    Persist(DomainError),
    #[error("invalid report: {0}")]
    Invalid(String),
}

/// Closed set of failure kinds, one per user-visible message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitErrorKind {
    Auth,
    MissingImage,
    UploadPermission,
    Upload,
    TagGeneration,
    Persist,
    Invalid,
}

impl SubmitError {
    pub fn kind(&self) -> SubmitErrorKind {
        match self {
            SubmitError::Auth(_) => SubmitErrorKind::Auth,
            SubmitError::MissingImage => SubmitErrorKind::MissingImage,
            SubmitError::UploadPermission(_) => SubmitErrorKind::UploadPermission,
            SubmitError::Upload(_) => SubmitErrorKind::Upload,
            SubmitError::TagGeneration(_) => SubmitErrorKind::TagGeneration,
            SubmitError::Persist(_) => SubmitErrorKind::Persist,
            SubmitError::Invalid(_) => SubmitErrorKind::Invalid,
        }
    }

    /// Message for the submitting user
    pub fn user_message(&self) -> String {
        match self {
            SubmitError::Auth(detail) => format!("You need to be signed in to report an item ({}).", detail),
            SubmitError::MissingImage => "Please add a photo of the item.".to_string(),
            SubmitError::UploadPermission(detail) => {
                format!("The photo could not be stored: {}", detail)
            }
            SubmitError::Upload(_) => "The photo upload failed. Please try again.".to_string(),
            SubmitError::TagGeneration(_) => {
                "We could not tag your report automatically. Nothing was saved; please try again."
                    .to_string()
            }
            SubmitError::Persist(_) => "Your report could not be saved. Please try again.".to_string(),
            SubmitError::Invalid(detail) => format!("Please check the form: {}", detail),
        }
    }
}

impl From<BlobError> for SubmitError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::PermissionDenied(detail) => SubmitError::UploadPermission(detail),
            BlobError::Failed(detail) => SubmitError::Upload(detail),
        }
    }
}

/// Busy indicator and last failure, for the report form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionStatus {
    pub busy: bool,
    pub last_error: Option<SubmitError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOptions {
    pub placeholder_image_url: String,
    pub require_photo: bool,
}

impl Default for SubmissionOptions {
    fn default() -> Self {
        Self {
            placeholder_image_url: DEFAULT_PLACEHOLDER_IMAGE_URL.to_string(),
            require_photo: false,
        }
    }
}

pub struct SubmissionPipeline {
    sync: ItemStoreSync,
    repo: Arc<dyn ItemRepository>,
    blobs: Arc<dyn BlobStore>,
    tagger: Arc<dyn TagGenerator>,
    options: SubmissionOptions,
    status_tx: watch::Sender<SubmissionStatus>,
}

/// Marks the pipeline busy; withdraws the optimistic copy and clears the
/// busy flag when dropped, even if the submission future is cancelled.
/// The outcome is published in the same status update, after the
/// withdrawal, so a reported failure never coexists with its pending copy.
struct InFlight<'a> {
    pipeline: &'a SubmissionPipeline,
    pending: Option<ItemId>,
    committed: bool,
    outcome: Option<Option<SubmitError>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let (Some(temp), false) = (&self.pending, self.committed) {
            self.pipeline.sync.discard_pending(temp);
        }
        let outcome = self.outcome.take();
        self.pipeline.status_tx.send_modify(|s| {
            s.busy = false;
            if let Some(last_error) = outcome {
                s.last_error = last_error;
            }
        });
    }
}

impl SubmissionPipeline {
    pub fn new(
        sync: ItemStoreSync,
        repo: Arc<dyn ItemRepository>,
        blobs: Arc<dyn BlobStore>,
        tagger: Arc<dyn TagGenerator>,
        options: SubmissionOptions,
    ) -> Self {
        let (status_tx, _) = watch::channel(SubmissionStatus::default());
        Self {
            sync,
            repo,
            blobs,
            tagger,
            options,
            status_tx,
        }
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SubmissionStatus> {
        self.status_tx.subscribe()
    }

    /// Report an item. Returns the id the store assigned.
    pub async fn submit(
        &self,
        user: Option<&User>,
        draft: ItemDraft,
        image: Option<ImageFile>,
    ) -> Result<ItemId, SubmitError> {
        let mut already_busy = false;
        self.status_tx.send_modify(|s| {
            already_busy = s.busy;
            s.busy = true;
        });
        if already_busy {
            return Err(SubmitError::Invalid("another report is still being submitted".to_string()));
        }

        let mut flight = InFlight {
            pipeline: self,
            pending: None,
            committed: false,
            outcome: None,
        };
        let result = self.run(user, draft, image, &mut flight).await;

        match &result {
            Ok(id) => info!(item = %id, "report submitted"),
            Err(e) => error!(kind = ?e.kind(), error = %e, "report submission failed"),
        }
        flight.outcome = Some(result.as_ref().err().cloned());
        drop(flight);
        result
    }

    async fn run(
        &self,
        user: Option<&User>,
        draft: ItemDraft,
        image: Option<ImageFile>,
        flight: &mut InFlight<'_>,
    ) -> Result<ItemId, SubmitError> {
        let user = user.ok_or_else(|| SubmitError::Auth("no signed-in user".to_string()))?;
        draft.validate().map_err(|e| match e {
            DomainError::InvalidInput(msg) => SubmitError::Invalid(msg),
            other => SubmitError::Invalid(other.to_string()),
        })?;
        if draft.university != user.university {
            return Err(SubmitError::Auth(format!(
                "reports can only be filed for {}",
                user.university
            )));
        }

        let image = image.filter(|i| !i.is_empty());
        if image.is_none() && self.options.require_photo {
            return Err(SubmitError::MissingImage);
        }

        let photo = image.as_ref().map(PhotoPayload::from_image);
        let created_at = Utc::now();

        let preview_url = photo
            .as_ref()
            .map(PhotoPayload::to_data_uri)
            .unwrap_or_else(|| self.options.placeholder_image_url.clone());
        let preview = Item::from_draft(
            ItemId::new("pending"),
            draft.clone(),
            user.email.clone(),
            created_at,
            Vec::new(),
            preview_url,
        );
        flight.pending = Some(self.sync.add_pending(preview));

        let image_url = match &image {
            Some(file) => {
                let key = blob_key(&file.file_name, created_at);
                info!(key = %key, bytes = file.bytes.len(), "uploading photo");
                self.blobs.put(&key, &file.bytes, &file.mime_type()).await?
            }
            None => self.options.placeholder_image_url.clone(),
        };

        info!(with_photo = photo.is_some(), "generating tags");
        let tags = tagging::generate_tags(self.tagger.as_ref(), &draft.description, photo.as_ref()).await?;

        let item = Item::from_draft(
            ItemId::new("new"),
            draft,
            user.email.clone(),
            created_at,
            tags,
            image_url,
        );
        info!("saving report");
        let id = self
            .repo
            .create(&ItemDocument::from_item(&item))
            .await
            .map_err(SubmitError::Persist)?;

        if let Some(temp) = &flight.pending {
            self.sync.confirm_pending(temp, id.clone());
        }
        flight.committed = true;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemStatus, ItemType};
    use crate::repository::{MemoryBlobStore, MemoryItemStore};
    use crate::testing::{sample_draft, sample_user, wait_for, FakeTagGenerator};
    use crate::visibility::mark_reunited;
    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::Notify;

    struct Harness {
        store: Arc<MemoryItemStore>,
        blobs: Arc<MemoryBlobStore>,
        sync: ItemStoreSync,
        pipeline: SubmissionPipeline,
    }

    async fn harness(tagger: Arc<dyn TagGenerator>, options: SubmissionOptions) -> Harness {
        let store = Arc::new(MemoryItemStore::new());
        let blobs = Arc::new(MemoryBlobStore::new("https://cdn.example.com"));
        let sync = ItemStoreSync::new(store.clone(), store.clone(), Duration::seconds(60));
        sync.start().await.unwrap();
        let pipeline = SubmissionPipeline::new(sync.clone(), store.clone(), blobs.clone(), tagger, options);
        Harness {
            store,
            blobs,
            sync,
            pipeline,
        }
    }

    fn wallet_draft(item_type: ItemType) -> ItemDraft {
        let mut draft = sample_draft("Black Leather Wallet", item_type, "State");
        draft.description = "black leather wallet with zipper".to_string();
        draft
    }

    #[tokio::test]
    async fn test_no_image_uses_placeholder_and_generated_tags() {
        let tagger = Arc::new(FakeTagGenerator::returning(&["wallet", "black", "leather", "zipper"]));
        let h = harness(tagger.clone(), SubmissionOptions::default()).await;
        let user = sample_user("me@state.edu", "State");

        let id = h
            .pipeline
            .submit(Some(&user), wallet_draft(ItemType::Lost), None)
            .await
            .unwrap();

        let calls = tagger.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].description, "black leather wallet with zipper");
        assert_eq!(calls[0].photo_data_uri, None);

        let stored = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.doc.image_url, DEFAULT_PLACEHOLDER_IMAGE_URL);
        assert_eq!(stored.doc.tags, vec!["wallet", "black", "leather", "zipper"]);
        assert_eq!(stored.doc.reported_by, "me@state.edu");
        assert_eq!(stored.doc.status, ItemStatus::Lost);
        assert!(h.blobs.keys().is_empty());

        let snap = wait_for(&h.sync, |s| s.len() == 1 && !s.entries[0].is_pending()).await;
        assert_eq!(snap.entries[0].item().id, id);
        assert_eq!(h.pipeline.status(), SubmissionStatus::default());
    }

    #[tokio::test]
    async fn test_image_is_uploaded_and_sent_inline() {
        let tagger = Arc::new(FakeTagGenerator::returning(&["wallet", "black", "leather"]));
        let h = harness(tagger.clone(), SubmissionOptions::default()).await;
        let user = sample_user("me@state.edu", "State");
        let photo = ImageFile::new("wallet.jpg", b"jpeg-bytes".to_vec());

        let id = h
            .pipeline
            .submit(Some(&user), wallet_draft(ItemType::Found), Some(photo))
            .await
            .unwrap();

        let keys = h.blobs.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("items/") && keys[0].ends_with("_wallet.jpg"));
        let (bytes, content_type) = h.blobs.get(&keys[0]).unwrap();
        assert_eq!(bytes, b"jpeg-bytes");
        assert_eq!(content_type, "image/jpeg");

        let uri = tagger.calls()[0].photo_data_uri.clone().unwrap();
        assert!(uri.starts_with("data:image/jpeg;base64,"));

        let stored = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.doc.image_url, format!("https://cdn.example.com/{}", keys[0]));
    }

    #[tokio::test]
    async fn test_tag_failure_aborts_submission() {
        let tagger = Arc::new(FakeTagGenerator::failing());
        let h = harness(tagger, SubmissionOptions::default()).await;
        let user = sample_user("me@state.edu", "State");
        let photo = ImageFile::new("wallet.png", b"png".to_vec());

        let err = h
            .pipeline
            .submit(Some(&user), wallet_draft(ItemType::Lost), Some(photo))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), SubmitErrorKind::TagGeneration);
        assert!(h.store.is_empty());
        assert!(h.sync.snapshot().is_empty());
        // Accepted: the photo stays behind.
        assert_eq!(h.blobs.keys().len(), 1);

        let status = h.pipeline.status();
        assert!(!status.busy);
        assert_eq!(status.last_error, Some(err));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_reported_after_optimistic_copy_withdrawn() {
        let tagger = Arc::new(FakeTagGenerator::failing());
        let h = harness(tagger, SubmissionOptions::default()).await;
        let user = sample_user("me@state.edu", "State");

        let mut status = h.pipeline.watch_status();
        let sync = h.sync.clone();
        let observer = tokio::spawn(async move {
            let mut pending_at_error = None;
            let busy = status
                .wait_for(|s| {
                    if s.last_error.is_some() {
                        pending_at_error = Some(sync.snapshot().entries.iter().any(|e| e.is_pending()));
                    }
                    s.last_error.is_some()
                })
                .await
                .expect("status channel closed")
                .busy;
            (busy, pending_at_error)
        });

        let err = h
            .pipeline
            .submit(Some(&user), wallet_draft(ItemType::Lost), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SubmitErrorKind::TagGeneration);

        let (busy, pending_at_error) = observer.await.unwrap();
        assert!(!busy);
        assert_eq!(pending_at_error, Some(false));
    }

    #[tokio::test]
    async fn test_upload_permission_error_is_actionable() {
        let tagger = Arc::new(FakeTagGenerator::returning(&["keys"]));
        let h = harness(tagger.clone(), SubmissionOptions::default()).await;
        h.blobs.set_deny_writes(true);
        let user = sample_user("me@state.edu", "State");

        let err = h
            .pipeline
            .submit(
                Some(&user),
                wallet_draft(ItemType::Lost),
                Some(ImageFile::new("keys.png", b"png".to_vec())),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), SubmitErrorKind::UploadPermission);
        assert!(err.user_message().contains("access policy"));
        assert!(tagger.calls().is_empty());
        assert!(h.store.is_empty());
        assert!(h.sync.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_withdraws_optimistic_copy() {
        let tagger = Arc::new(FakeTagGenerator::returning(&["keys", "silver", "ring"]));
        let h = harness(tagger, SubmissionOptions::default()).await;
        h.store.set_fail_writes(true);
        let user = sample_user("me@state.edu", "State");

        let err = h
            .pipeline
            .submit(Some(&user), wallet_draft(ItemType::Lost), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::Persist(DomainError::Unavailable(_))));
        assert!(h.sync.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_precondition_failures() {
        let tagger = Arc::new(FakeTagGenerator::returning(&["keys"]));
        let h = harness(
            tagger.clone(),
            SubmissionOptions {
                require_photo: true,
                ..SubmissionOptions::default()
            },
        )
        .await;
        let user = sample_user("me@state.edu", "State");

        let err = h.pipeline.submit(None, wallet_draft(ItemType::Lost), None).await.unwrap_err();
        assert_eq!(err.kind(), SubmitErrorKind::Auth);

        let mut elsewhere = wallet_draft(ItemType::Lost);
        elsewhere.university = "Tech".to_string();
        let err = h.pipeline.submit(Some(&user), elsewhere, None).await.unwrap_err();
        assert_eq!(err.kind(), SubmitErrorKind::Auth);

        let mut short = wallet_draft(ItemType::Lost);
        short.description = "wallet".to_string();
        let err = h.pipeline.submit(Some(&user), short, None).await.unwrap_err();
        assert_eq!(err, SubmitError::Invalid("description must be at least 10 characters".to_string()));

        let empty_photo = ImageFile::new("a.png", Vec::new());
        let err = h
            .pipeline
            .submit(Some(&user), wallet_draft(ItemType::Lost), Some(empty_photo))
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::MissingImage);

        assert!(tagger.calls().is_empty());
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_found_item_round_trip_to_reunited() {
        let tagger = Arc::new(FakeTagGenerator::returning(&["calculator", "graphing", "ti-84"]));
        let h = harness(tagger, SubmissionOptions::default()).await;
        let user = sample_user("finder@state.edu", "State");

        let id = h
            .pipeline
            .submit(Some(&user), sample_draft("Graphing Calculator", ItemType::Found, "State"), None)
            .await
            .unwrap();
        let stored = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.doc.status, ItemStatus::Found);

        let snap = wait_for(&h.sync, |s| s.find(&id).is_some()).await;
        let entry = snap.find(&id).unwrap().clone();
        mark_reunited(&h.sync, &entry, &user).unwrap().unwrap().await.unwrap();

        let stored = h.store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.doc.status, ItemStatus::Reunited);
        assert_eq!(stored.doc.item_type, ItemType::Found);
    }

    /// Holds the tagging call until released
    struct GatedTagger {
        gate: Notify,
    }

    #[async_trait]
    impl TagGenerator for GatedTagger {
        async fn generate_tags(&self, _request: &tagging::TagRequest) -> Result<Vec<String>, TagGenerationError> {
            self.gate.notified().await;
            Ok(vec!["umbrella".to_string(), "blue".to_string(), "folding".to_string()])
        }
    }

    #[tokio::test]
    async fn test_optimistic_copy_shown_then_superseded() {
        let tagger = Arc::new(GatedTagger { gate: Notify::new() });
        let h = harness(tagger.clone(), SubmissionOptions::default()).await;
        let user = sample_user("me@state.edu", "State");
        let photo = ImageFile::new("umbrella.png", b"png".to_vec());

        let submit = h
            .pipeline
            .submit(Some(&user), sample_draft("Blue Umbrella", ItemType::Lost, "State"), Some(photo));
        let observe = async {
            let snap = wait_for(&h.sync, |s| s.len() == 1 && s.entries[0].is_pending()).await;
            assert!(snap.entries[0].item().image_url.starts_with("data:image/png;base64,"));
            assert!(h.pipeline.status().busy);

            let err = h.pipeline.submit(Some(&user), wallet_draft(ItemType::Lost), None).await.unwrap_err();
            assert!(matches!(err, SubmitError::Invalid(_)));

            tagger.gate.notify_one();
        };
        let (result, ()) = tokio::join!(submit, observe);
        let id = result.unwrap();

        let snap = wait_for(&h.sync, |s| s.len() == 1 && !s.entries[0].is_pending()).await;
        assert_eq!(snap.entries[0].item().id, id);
        assert!(snap.entries[0].item().image_url.starts_with("https://cdn.example.com/items/"));
        assert!(!h.pipeline.status().busy);
    }
}
