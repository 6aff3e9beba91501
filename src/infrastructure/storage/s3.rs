use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{info, warn};

use super::error::{StorageError, StorageResult};
use super::{validate_key, ObjectStore, StoredArtifact};
use crate::config::settings::StorageConfig;

/// S3-compatible store. A custom endpoint switches to path-style addressing (MinIO, emulators).
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    pub async fn new(config: &StorageConfig) -> Self {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = Builder::from(&shared);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            builder = builder.credentials_provider(credentials);
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        match &config.endpoint {
            Some(endpoint) => info!("✅ Using S3 storage at {} (bucket {})", endpoint, config.bucket),
            None => info!("✅ Using S3 storage in {} (bucket {})", config.region, config.bucket),
        }

        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn put(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<StoredArtifact> {
        validate_key(key)?;
        let size_bytes = body.len() as u64;

        self.client
            .put_object()
            .bucket(container)
            .key(key)
            .body(ByteStream::from(body))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{}: {}", key, e.into_service_error())))?;

        Ok(StoredArtifact {
            container_id: container.to_string(),
            key: key.to_string(),
            content_type: content_type.map(str::to_string),
            size_bytes,
            body: None,
        })
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<StoredArtifact> {
        validate_key(key)?;

        let response = match self.client.get_object().bucket(container).key(key).send().await {
            Ok(response) => response,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    warn!(key, "Object not found");
                    return Err(StorageError::not_found(key));
                }
                return Err(StorageError::DownloadFailed(format!("{}: {}", key, service_error)));
            }
        };

        let content_type = response.content_type().map(str::to_string);
        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("{}: {}", key, e)))?
            .into_bytes();

        Ok(StoredArtifact {
            container_id: container.to_string(),
            key: key.to_string(),
            content_type,
            size_bytes: body.len() as u64,
            body: Some(body),
        })
    }

    async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        validate_key(key)?;

        // S3 answers 204 for missing keys too.
        self.client
            .delete_object()
            .bucket(container)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(format!("{}: {}", key, e.into_service_error())))?;

        Ok(())
    }

    fn locate(&self, container: &str, key: &str) -> String {
        format!("{}/{}", container, key)
    }
}
