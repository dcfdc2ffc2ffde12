//! Object storage for original tender files.

mod fs;

pub use fs::{sign, verify_signature, FsObjectStorage};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error for {key}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// A time-limited link to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<SignedUrl, StorageError>;
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding uploaded files.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Prefix for generated URLs, e.g. `http://localhost:8080`.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// HMAC-style secret mixed into URL signatures.
    #[serde(default)]
    pub signing_secret: String,

    #[serde(default = "default_url_ttl")]
    pub url_ttl_secs: u64,
}

fn default_root() -> PathBuf {
    PathBuf::from("tenderdesk-files")
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_url_ttl() -> u64 {
    900
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            public_base_url: default_public_base_url(),
            signing_secret: String::new(),
            url_ttl_secs: default_url_ttl(),
        }
    }
}

/// Reject keys that could escape the storage root.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
