//! Runtime configuration
//!
//! Read from a JSON file next to the database (missing file means
//! defaults), then overridden by `CAMPUS_FINDS_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_PLACEHOLDER_IMAGE_URL: &str = "https://placehold.co/600x400.png";

/// Upper bound for the optimistic reconciliation window
const MAX_RECONCILE_WINDOW_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3400/generateTags".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("campus-finds.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub root: PathBuf,
    pub public_base_url: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
            public_base_url: "http://127.0.0.1:8080/uploads".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tagging: TaggingConfig,
    pub storage: StorageConfig,
    pub blobs: BlobConfig,
    pub placeholder_image_url: String,
    /// Reject reports without a photo
    pub require_photo: bool,
    pub reconcile_window_secs: u64,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tagging: TaggingConfig::default(),
            storage: StorageConfig::default(),
            blobs: BlobConfig::default(),
            placeholder_image_url: DEFAULT_PLACEHOLDER_IMAGE_URL.to_string(),
            require_photo: false,
            reconcile_window_secs: 300,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| env::var(key).ok())
    }

    /// Override from `lookup`. Blank values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("CAMPUS_FINDS_TAGGING_ENDPOINT") {
            self.tagging.endpoint = v;
        }
        if let Some(v) = get("CAMPUS_FINDS_TAGGING_API_KEY") {
            self.tagging.api_key = Some(v);
        }
        if let Some(v) = get("CAMPUS_FINDS_DB_PATH") {
            self.storage.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("CAMPUS_FINDS_BLOB_ROOT") {
            self.blobs.root = PathBuf::from(v);
        }
        if let Some(v) = get("CAMPUS_FINDS_BLOB_BASE_URL") {
            self.blobs.public_base_url = v;
        }
        if let Some(v) = get("CAMPUS_FINDS_PLACEHOLDER_IMAGE_URL") {
            self.placeholder_image_url = v;
        }
        if let Some(v) = get("CAMPUS_FINDS_REQUIRE_PHOTO") {
            self.require_photo = parse_bool("CAMPUS_FINDS_REQUIRE_PHOTO", &v)?;
        }
        if let Some(v) = get("CAMPUS_FINDS_RECONCILE_WINDOW_SECS") {
            self.reconcile_window_secs = v.parse().map_err(|_| {
                ConfigError::invalid("CAMPUS_FINDS_RECONCILE_WINDOW_SECS", format!("'{}' is not a number", v))
            })?;
        }
        if let Some(v) = get("CAMPUS_FINDS_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.tagging.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::invalid("tagging.endpoint", "must be an http(s) URL"));
        }
        if self.blobs.public_base_url.trim().is_empty() {
            return Err(ConfigError::invalid("blobs.public_base_url", "must not be empty"));
        }
        if self.placeholder_image_url.trim().is_empty() {
            return Err(ConfigError::invalid("placeholder_image_url", "must not be empty"));
        }
        if self.reconcile_window_secs == 0 || self.reconcile_window_secs > MAX_RECONCILE_WINDOW_SECS {
            return Err(ConfigError::invalid(
                "reconcile_window_secs",
                format!("must be between 1 and {}", MAX_RECONCILE_WINDOW_SECS),
            ));
        }
        Ok(())
    }

    pub fn reconcile_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reconcile_window_secs.min(MAX_RECONCILE_WINDOW_SECS) as i64)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("'{}' is not a boolean", value))),
    }
}
