//! Remote object storage for synced books
//! Uses Apache Arrow object_store crate

pub mod layout;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload,
    path::Path as StoragePath,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload of {key} failed: {source}")]
    UploadFailed {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Download of {key} failed: {source}")]
    DownloadFailed {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub key: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    pub bucket: String,
    /// The local filesystem backend rejects object attributes.
    supports_attributes: bool,
}

impl StorageClient {
    /// Create new storage client with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            supports_attributes: true,
        }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "epubvault-memory")
    }

    /// Build the client for the configured provider.
    ///
    /// The `local` provider keeps each bucket in its own directory under
    /// `local_root`.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.provider {
            StorageProvider::Memory => Ok(Self::new(Arc::new(InMemory::new()), &config.bucket)),
            StorageProvider::Local => {
                let root = config
                    .local_root
                    .as_ref()
                    .ok_or_else(|| StorageError::InvalidConfig("storage.local_root is not set".to_string()))?
                    .join(&config.bucket);
                std::fs::create_dir_all(&root)?;
                let store = LocalFileSystem::new_with_prefix(&root)?;
                Ok(Self {
                    store: Arc::new(store),
                    bucket: config.bucket.clone(),
                    supports_attributes: false,
                })
            }
            StorageProvider::S3 => {
                let mut builder = AmazonS3Builder::new().with_bucket_name(&config.bucket);
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                if let Some(access_key) = &config.access_key {
                    builder = builder.with_access_key_id(access_key);
                }
                if let Some(secret_key) = &config.secret_key {
                    builder = builder.with_secret_access_key(secret_key);
                }
                Ok(Self::new(Arc::new(builder.build()?), &config.bucket))
            }
        }
    }

    /// Upload bytes to storage with an explicit content type
    pub async fn upload(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<UploadMetadata> {
        let path = StoragePath::from(key);
        let data: Bytes = data.into();
        let size = data.len();

        let mut opts = PutOptions::default();
        if self.supports_attributes {
            let mut attributes = Attributes::new();
            attributes.insert(
                Attribute::ContentType,
                AttributeValue::from(content_type.to_string()),
            );
            opts.attributes = attributes;
        }

        let put_result = self
            .store
            .put_opts(&path, PutPayload::from(data), opts)
            .await
            .map_err(|source| StorageError::UploadFailed {
                key: key.to_string(),
                source,
            })?;

        tracing::debug!(key, size, content_type, "Uploaded to storage");

        Ok(UploadMetadata {
            key: key.to_string(),
            etag: put_result.e_tag,
            size,
        })
    }

    /// Download from storage. A missing object is [`StorageError::NotFound`].
    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let path = StoragePath::from(key);

        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(source) => {
                return Err(StorageError::DownloadFailed {
                    key: key.to_string(),
                    source,
                });
            }
        };

        let bytes = result.bytes().await?;
        tracing::debug!(key, size = bytes.len(), "Downloaded from storage");
        Ok(bytes)
    }

    /// Download, mapping a missing object to `None`.
    pub async fn download_opt(&self, key: &str) -> Result<Option<Bytes>> {
        match self.download(key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys under `prefix`, in listing order. Keys come back in the store's
    /// percent-encoded form.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .list_paths(prefix)
            .await?
            .iter()
            .map(ToString::to_string)
            .collect())
    }

    async fn list_paths(&self, prefix: &str) -> Result<Vec<StoragePath>> {
        let prefix = StoragePath::from(prefix);
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        Ok(objects.into_iter().map(|meta| meta.location).collect())
    }

    /// Delete every object under `prefix`. Returns the number removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        self.prune(prefix, &[]).await
    }

    /// Delete every object under `prefix` whose key is not in `keep`.
    /// Returns the number removed; objects already gone are not counted.
    pub async fn prune(&self, prefix: &str, keep: &[String]) -> Result<usize> {
        let keep: HashSet<StoragePath> = keep
            .iter()
            .map(|key| StoragePath::from(key.as_str()))
            .collect();

        let mut deleted = 0;
        for path in self.list_paths(prefix).await? {
            if keep.contains(&path) {
                continue;
            }
            match self.store.delete(&path).await {
                Ok(()) => deleted += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(prefix, deleted, "Deleted from storage");
        Ok(deleted)
    }

    /// Make sure the bucket is reachable and writable by writing a marker
    /// object once. Safe to call repeatedly.
    pub async fn ensure_bucket(&self) -> Result<()> {
        if self.exists(layout::BUCKET_MARKER_KEY).await? {
            return Ok(());
        }
        self.upload(
            layout::BUCKET_MARKER_KEY,
            Bytes::from_static(b"epubvault"),
            "text/plain",
        )
        .await?;
        tracing::info!(bucket = %self.bucket, "Initialized storage bucket");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let client = StorageClient::in_memory();
        let meta = client
            .upload("books/b1/index", "<html></html>", layout::CONTENT_TYPE_HTML)
            .await
            .unwrap();
        assert_eq!(meta.size, 13);

        let bytes = client.download("books/b1/index").await.unwrap();
        assert_eq!(&bytes[..], b"<html></html>");
        assert!(client.exists("books/b1/index").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let client = StorageClient::in_memory();
        let err = client.download("books/none/index").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(client.download_opt("books/none/index").await.unwrap().is_none());
        assert!(!client.exists("books/none/index").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_prefix_only_touches_book() {
        let client = StorageClient::in_memory();
        for key in ["books/a/index", "books/a/chapters/1", "books/ab/index"] {
            client.upload(key, "x", "text/plain").await.unwrap();
        }

        let deleted = client.delete_prefix(&layout::book_prefix("a")).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(client.exists("books/ab/index").await.unwrap());
        assert!(client.list("books/a/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_prefix_handles_escaped_keys() {
        let client = StorageClient::in_memory();
        for key in [
            "books/b/resources/OEBPS/fig[1].png",
            "books/b/resources/OEBPS/50%.png",
            "books/b/index",
        ] {
            client.upload(key, "x", "image/png").await.unwrap();
        }

        let deleted = client.delete_prefix("books/b/").await.unwrap();
        assert_eq!(deleted, 3);
        assert!(client.list("books/b/").await.unwrap().is_empty());
        assert!(!client.exists("books/b/resources/OEBPS/fig[1].png").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_keeps_listed_keys() {
        let client = StorageClient::in_memory();
        for key in ["books/b/chapters/ch1", "books/b/chapters/ch2", "books/b/chapters/old #3"] {
            client.upload(key, "x", "text/html").await.unwrap();
        }

        let keep = vec!["books/b/chapters/ch1".to_string(), "books/b/chapters/ch2".to_string()];
        let removed = client.prune("books/b/chapters/", &keep).await.unwrap();

        assert_eq!(removed, 1);
        assert!(client.exists("books/b/chapters/ch1").await.unwrap());
        assert!(client.exists("books/b/chapters/ch2").await.unwrap());
        assert!(!client.exists("books/b/chapters/old #3").await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_bucket_is_idempotent() {
        let client = StorageClient::in_memory();
        client.ensure_bucket().await.unwrap();
        client.ensure_bucket().await.unwrap();
        assert!(client.exists(layout::BUCKET_MARKER_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_provider() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            provider: StorageProvider::Local,
            local_root: Some(temp_dir.path().to_path_buf()),
            ..StorageConfig::default()
        };
        let client = StorageClient::from_config(&config).unwrap();
        client
            .upload("books/b1/styles", "p {}", layout::CONTENT_TYPE_CSS)
            .await
            .unwrap();
        assert_eq!(&client.download("books/b1/styles").await.unwrap()[..], b"p {}");
        assert!(temp_dir.path().join(&config.bucket).join("books/b1/styles").exists());
    }
}
