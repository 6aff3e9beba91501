use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::dto::{ACCEPTED_STATUS, EnqueueResponse, StatusResponse};
use super::error::VideoError;
use super::model::Video;
use super::repository::JobRecordStore;
use super::validator::{UploadDescriptor, UploadValidator};
use crate::config::settings::AppConfig;
use crate::infrastructure::queue::job::{JobEnvelope, QueueMessage, RetryPolicy};
use crate::infrastructure::queue::state::{now_millis, JobStateStore};
use crate::infrastructure::queue::JobQueue;
use crate::infrastructure::storage::{object_key, StorageGateway};

/// Bytes and file name of a finished archive.
#[derive(Debug)]
pub struct DownloadedArchive {
    pub file_name: String,
    pub body: Bytes,
}

/// Builds the first attempt of an item's job.
pub fn job_for(video: &Video, policy: RetryPolicy) -> JobEnvelope {
    let message = QueueMessage {
        work_item_id: video.id,
        owner_id: video.owner_id.clone(),
        source_name: video.file_name.clone(),
        enqueued_at: now_millis(),
    };
    JobEnvelope::new(message, policy)
}

#[derive(Clone)]
pub struct VideoService {
    validator: UploadValidator,
    storage: StorageGateway,
    records: Arc<dyn JobRecordStore>,
    queue: Arc<dyn JobQueue>,
    jobs: Arc<dyn JobStateStore>,
    config: Arc<AppConfig>,
}

impl VideoService {
    pub fn new(
        validator: UploadValidator,
        storage: StorageGateway,
        records: Arc<dyn JobRecordStore>,
        queue: Arc<dyn JobQueue>,
        jobs: Arc<dyn JobStateStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            validator,
            storage,
            records,
            queue,
            jobs,
            config,
        }
    }

    /// Validates, stores the source, records the item and submits its job.
    ///
    /// A rejected upload leaves nothing behind. Once the record exists it is
    /// kept even if submission fails; the reconciler picks it up later.
    pub async fn enqueue(
        &self,
        upload: UploadDescriptor,
        body: Bytes,
        owner_id: &str,
    ) -> Result<EnqueueResponse, VideoError> {
        let video = self.validator.validate(&upload, owner_id)?;
        let source_key = object_key(&video.owner_id, video.id, &video.file_name);

        self.storage
            .put(&source_key, body, upload.content_type.as_deref())
            .await?;

        let video = match self.records.create(&video).await {
            Ok(video) => video,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&source_key).await {
                    warn!(key = %source_key, "Failed to remove orphaned source: {}", cleanup);
                }
                return Err(e.into());
            }
        };

        let job_id = self.submit(&video).await.inspect_err(|e| {
            error!(video_id = %video.id, "Video stays PENDING, submission failed: {}", e);
        })?;

        info!(video_id = %video.id, job_id = %job_id, owner_id = %video.owner_id, "🎬 Video accepted");

        Ok(EnqueueResponse {
            job_id,
            status: ACCEPTED_STATUS.to_string(),
            work_item_id: video.id,
        })
    }

    /// Hands the item's job to the queue from its first attempt and returns
    /// its id. Submitting an item again resets the same job to `waiting`.
    pub async fn submit(&self, video: &Video) -> Result<String, VideoError> {
        let envelope = job_for(video, self.config.queue.retry_policy());
        self.queue.enqueue(&envelope).await?;
        Ok(envelope.job_id)
    }

    pub async fn status(&self, job_id: &str) -> Result<StatusResponse, VideoError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| VideoError::NotFound(format!("Job {}", job_id)))?;
        Ok(job.into())
    }

    pub async fn find_by_id(&self, owner_id: &str, id: Uuid) -> Result<Video, VideoError> {
        self.records
            .find_by_id(id)
            .await?
            .filter(|video| video.owner_id == owner_id)
            .ok_or_else(|| VideoError::NotFound(format!("Video {}", id)))
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Video>, VideoError> {
        Ok(self.records.list_by_owner(owner_id).await?)
    }

    /// Archive bytes, looked up under the caller's own namespace.
    pub async fn download(&self, owner_id: &str, id: Uuid) -> Result<DownloadedArchive, VideoError> {
        let file_name = self.config.worker.output_file_name.clone();
        let key = object_key(owner_id, id, &file_name);

        let artifact = self.storage.get(&key).await.map_err(|e| {
            if e.is_not_found() {
                VideoError::NotFound(format!("Result for video {}", id))
            } else {
                e.into()
            }
        })?;

        let body = artifact
            .body
            .ok_or_else(|| VideoError::NotFound(format!("Result for video {}", id)))?;

        Ok(DownloadedArchive { file_name, body })
    }
}
