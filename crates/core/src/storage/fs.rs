//! Filesystem-backed object storage with signed download URLs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{validate_key, ObjectStorage, SignedUrl, StorageConfig, StorageError};

/// Signature for `key` valid until the unix timestamp `expires`.
pub fn sign(secret: &str, key: &str, expires: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"|");
    hasher.update(key.as_bytes());
    hasher.update(b"|");
    hasher.update(expires.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a signature produced by [`sign`] and that it has not expired.
pub fn verify_signature(secret: &str, key: &str, expires: i64, signature: &str, now: i64) -> bool {
    if expires <= now {
        return false;
    }
    let expected = sign(secret, key, expires);
    expected.len() == signature.len()
        && expected
            .bytes()
            .zip(signature.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

pub struct FsObjectStorage {
    root: PathBuf,
    public_base_url: String,
    signing_secret: String,
}

impl FsObjectStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signing_secret: signing_secret.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            config.root.clone(),
            config.public_base_url.clone(),
            config.signing_secret.clone(),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(io_err)?;
        debug!(key, bytes = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<SignedUrl, StorageError> {
        validate_key(key)?;
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(900));
        let expires_at = Utc::now() + ttl;
        let expires = expires_at.timestamp();
        let signature = sign(&self.signing_secret, key, expires);
        Ok(SignedUrl {
            url: format!(
                "{}/api/v1/files/{}?expires={}&signature={}",
                self.public_base_url,
                urlencoding::encode(key),
                expires,
                signature
            ),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &Path) -> FsObjectStorage {
        FsObjectStorage::new(dir, "http://files.test/", "secret")
    }

    #[tokio::test]
    async fn test_put_get_roundtrip_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());

        store.put("tenders/t-1/load.txt", b"PO 1").await.unwrap();
        assert_eq!(store.get("tenders/t-1/load.txt").await.unwrap(), b"PO 1");
        assert!(dir.path().join("tenders/t-1/load.txt").exists());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = storage(dir.path()).get("nope.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_put_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let err = storage(dir.path()).put("../x", b"").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[test]
    fn test_signed_url_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());
        let signed = store
            .signed_url("tenders/t-1/a b.pdf", Duration::from_secs(60))
            .unwrap();

        assert!(signed
            .url
            .starts_with("http://files.test/api/v1/files/tenders%2Ft-1%2Fa%20b.pdf?expires="));
        let signature = signed.url.rsplit("signature=").next().unwrap();
        let expires = signed.expires_at.timestamp();
        let now = Utc::now().timestamp();

        assert!(verify_signature("secret", "tenders/t-1/a b.pdf", expires, signature, now));
        assert!(!verify_signature("other", "tenders/t-1/a b.pdf", expires, signature, now));
        assert!(!verify_signature("secret", "tenders/t-2/a b.pdf", expires, signature, now));
        assert!(!verify_signature("secret", "tenders/t-1/a b.pdf", expires, signature, expires));
    }

    #[test]
    fn test_sign_is_sha256_of_joined_parts() {
        let expected = hex::encode(Sha256::digest(b"s|k|42"));
        assert_eq!(sign("s", "k", 42), expected);
    }
}
