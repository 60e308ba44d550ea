//! Media blob storage
//!
//! Downloaded bytes are written under the media directory as
//! `{external_id}-{sha256}.{ext}`. The digest is computed on a blocking
//! thread.

use crate::error::{SyncError, SyncResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A blob written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// File name relative to the media directory
    pub blob_ref: String,
    /// Hex SHA-256 of the bytes
    pub content_digest: String,
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, blob_ref: &str) -> PathBuf {
        self.root.join(blob_ref)
    }

    /// Hash and write bytes for a remote file
    ///
    /// `source_url` only contributes the file extension.
    pub async fn store(&self, external_id: i64, source_url: &str, bytes: Vec<u8>) -> SyncResult<StoredBlob> {
        let (content_digest, bytes) = tokio::task::spawn_blocking(move || {
            let digest = format!("{:x}", Sha256::digest(&bytes));
            (digest, bytes)
        })
        .await
        .map_err(|e| SyncError::LocalPersistence(format!("Hash task failed: {}", e)))?;

        let blob_ref = match extension(source_url) {
            Some(ext) => format!("{}-{}.{}", external_id, content_digest, ext),
            None => format!("{}-{}", external_id, content_digest),
        };

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path(&blob_ref), &bytes).await?;

        tracing::debug!(external_id, blob_ref = %blob_ref, size = bytes.len(), "Stored media blob");

        Ok(StoredBlob {
            blob_ref,
            content_digest,
        })
    }

    /// Remove a blob; a missing file is not an error
    pub async fn remove(&self, blob_ref: &str) -> SyncResult<()> {
        match tokio::fs::remove_file(self.path(blob_ref)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Lowercase alphanumeric extension of the URL path, if any
fn extension(source_url: &str) -> Option<String> {
    let path = source_url.split(['?', '#']).next().unwrap_or_default();
    let file_name = path.rsplit('/').next()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_names_blob_by_digest() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());

        let blob = store
            .store(42, "https://cdn.test/files/42.JPG?v=1", b"hello".to_vec())
            .await
            .unwrap();

        assert_eq!(
            blob.content_digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(blob.blob_ref, format!("42-{}.jpg", blob.content_digest));
        assert_eq!(std::fs::read(store.path(&blob.blob_ref)).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_remove_missing_blob_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());
        store.remove("nope").await.unwrap();
    }

    #[test]
    fn test_extension_parsing() {
        assert_eq!(extension("https://x/a/b.png"), Some("png".into()));
        assert_eq!(extension("https://x/a/b"), None);
        assert_eq!(extension("https://x/a.dir/b"), None);
    }
}
