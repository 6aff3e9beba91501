//! Blob storage behind one contract, on local disk or S3.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::info;

pub mod error;
pub mod local;
pub mod s3;

use crate::config::settings::{StorageConfig, StorageMode};
use error::{StorageError, StorageResult};
use local::LocalStorage;
use s3::S3Storage;

/// Metadata of a stored object; `body` is only filled on reads.
#[derive(Debug, Clone, Serialize)]
pub struct StoredArtifact {
    pub container_id: String,
    pub key: String,
    pub content_type: Option<String>,
    pub size_bytes: u64,
    #[serde(skip)]
    pub body: Option<Bytes>,
}

/// Whole-object store keyed by `container/key`.
///
/// `put` replaces the object atomically, `get` fails with `NotFound` for
/// missing keys and `delete` succeeds for them.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<StoredArtifact>;

    async fn get(&self, container: &str, key: &str) -> StorageResult<StoredArtifact>;

    async fn delete(&self, container: &str, key: &str) -> StorageResult<()>;

    /// Where the object lives, as reported back to callers.
    fn locate(&self, container: &str, key: &str) -> String;
}

/// `owner/work_item/file`. The owner prefix is the only access boundary the store knows about.
pub fn object_key(owner_id: &str, work_item_id: impl std::fmt::Display, file_name: &str) -> String {
    format!("{}/{}/{}", owner_id, work_item_id, file_name)
}

/// Rejects keys that could step outside their container.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(StorageError::invalid_key(key));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}

/// An object store bound to the configured container.
#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    container: String,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    pub async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>) -> StorageResult<StoredArtifact> {
        self.store.put(&self.container, key, body, content_type).await
    }

    pub async fn get(&self, key: &str) -> StorageResult<StoredArtifact> {
        self.store.get(&self.container, key).await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.store.delete(&self.container, key).await
    }

    pub fn locate(&self, key: &str) -> String {
        self.store.locate(&self.container, key)
    }
}

pub async fn build_storage(config: &StorageConfig) -> StorageGateway {
    let store: Arc<dyn ObjectStore> = match config.mode {
        StorageMode::Local => {
            info!("🗄️ Using local storage at {}", config.local_root.display());
            Arc::new(LocalStorage::new(&config.local_root))
        }
        StorageMode::S3 => Arc::new(S3Storage::new(config).await),
    };

    StorageGateway::new(store, config.bucket.clone())
}
