//! Blob storage for item photos

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use super::traits::BlobStore;

/// Characters left as-is inside one URL path segment
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_');

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    /// The store refused the write; the message names what to fix
    #[error("storage rejected the write: {0}")]
    PermissionDenied(String),
    #[error("upload failed: {0}")]
    Failed(String),
}

/// Collision-resistant key: `items/<unix millis>_<sanitized file name>`
pub fn blob_key(file_name: &str, now: DateTime<Utc>) -> String {
    let base = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned = sanitize_name(base.trim());
    let cleaned = cleaned.trim_matches('.');
    let name = if cleaned.is_empty() { "photo" } else { cleaned };

    format!("items/{}_{}", now.timestamp_millis(), name)
}

fn unsafe_chars() -> Option<&'static Regex> {
    static UNSAFE: OnceLock<Option<Regex>> = OnceLock::new();
    UNSAFE
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").ok())
        .as_ref()
}

/// Replace each run of characters outside `[A-Za-z0-9._-]` with one `_`
fn sanitize_name(name: &str) -> String {
    match unsafe_chars() {
        Some(re) => re.replace_all(name, "_").into_owned(),
        None => collapse_unsafe(name),
    }
}

fn collapse_unsafe(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), encode_key(key))
}

/// Writes photos below a local directory served at `public_base_url`
pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(BlobError::Failed(format!("invalid blob key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    fn map_io(&self, err: io::Error, path: &Path) -> BlobError {
        match err.kind() {
            io::ErrorKind::PermissionDenied => BlobError::PermissionDenied(format!(
                "cannot write {}: grant this process write access to the upload directory {}",
                path.display(),
                self.root.display()
            )),
            _ => BlobError::Failed(format!("{}: {}", path.display(), err)),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, BlobError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.map_io(e, parent))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| self.map_io(e, &path))?;
        Ok(public_url(&self.public_base_url, key))
    }
}

/// In-process blob store, with a switch to simulate a rejecting access policy
pub struct MemoryBlobStore {
    public_base_url: String,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    deny_writes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            objects: Mutex::new(HashMap::new()),
            deny_writes: AtomicBool::new(false),
        }
    }

    pub fn set_deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    /// Stored bytes and content type for `key`
    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, BlobError> {
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(BlobError::PermissionDenied(format!(
                "write to '{}' denied: the bucket access policy does not allow uploads under items/",
                key
            )));
        }
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(public_url(&self.public_base_url, key))
    }
}
