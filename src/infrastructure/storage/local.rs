use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::{validate_key, ObjectStore, StoredArtifact};

/// Filesystem-backed store for development: `<root>/<container>/<key>`.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, container: &str, key: &str) -> StorageResult<PathBuf> {
        validate_key(container)?;
        validate_key(key)?;

        let mut path = self.root.join(container);
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalStorage {
    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<StoredArtifact> {
        let path = self.path_for(container, key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::invalid_key(key))?;
        fs::create_dir_all(parent).await?;

        // Readers see either the old object or the complete new one.
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StorageError::invalid_key(key))?;
        let staging = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&staging, &body).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::UploadFailed(format!("{}: {}", key, e)));
        }
        if let Err(e) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::UploadFailed(format!("{}: {}", key, e)));
        }

        debug!(key, bytes = body.len(), "Stored object on disk");

        Ok(StoredArtifact {
            container_id: container.to_string(),
            key: key.to_string(),
            content_type: content_type.map(str::to_string),
            size_bytes: body.len() as u64,
            body: None,
        })
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<StoredArtifact> {
        let path = self.path_for(container, key)?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(key, "File not found");
                return Err(StorageError::not_found(key));
            }
            Err(e) => return Err(StorageError::DownloadFailed(format!("{}: {}", key, e))),
        };

        let content_type = mime_guess::from_path(&path)
            .first()
            .map(|mime| mime.essence_str().to_string());

        Ok(StoredArtifact {
            container_id: container.to_string(),
            key: key.to_string(),
            content_type,
            size_bytes: data.len() as u64,
            body: Some(Bytes::from(data)),
        })
    }

    async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        let path = self.path_for(container, key)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!("{}: {}", key, e))),
        }
    }

    fn locate(&self, container: &str, key: &str) -> String {
        self.root.join(container).join(key).display().to_string()
    }
}
