use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

use crate::infrastructure::media::error::TransformError;
use crate::infrastructure::media::MediaTransformer;
use crate::infrastructure::queue::error::{QueueError, QueueResult};
use crate::infrastructure::queue::job::QueueMessage;
use crate::infrastructure::queue::state::JobStateStore;
use crate::infrastructure::storage::error::StorageError;
use crate::infrastructure::storage::{object_key, StorageGateway};
use crate::modules::video::dto::ProcessingOutput;
use crate::modules::video::model::VideoStatus;
use crate::modules::video::repository::{JobRecordStore, RepositoryError};

pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("processing failed: source {0} is missing")]
    SourceMissing(String),

    #[error("processing failed: video is completed but {0} is missing")]
    ArchiveMissing(String),

    #[error("processing failed: {0}")]
    Storage(#[from] StorageError),

    #[error("processing failed: {0}")]
    Transform(#[from] TransformError),

    #[error("processing failed: {0}")]
    Repository(#[from] RepositoryError),

    #[error("processing failed: {0}")]
    Queue(#[from] QueueError),
}

impl ProcessingError {
    /// Infrastructure hiccups are worth another attempt; bad input is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessingError::SourceMissing(_)
            | ProcessingError::ArchiveMissing(_)
            | ProcessingError::Transform(_) => false,
            ProcessingError::Storage(e) => !matches!(e, StorageError::NotFound(_) | StorageError::InvalidKey(_)),
            ProcessingError::Repository(e) => matches!(e, RepositoryError::Database(_)),
            ProcessingError::Queue(_) => true,
        }
    }
}

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: u8) -> QueueResult<()>;
}

/// Progress of one job, written to the job-state store.
pub struct JobProgress {
    states: Arc<dyn JobStateStore>,
    job_id: String,
}

impl JobProgress {
    pub fn new(states: Arc<dyn JobStateStore>, job_id: impl Into<String>) -> Self {
        Self {
            states,
            job_id: job_id.into(),
        }
    }
}

#[async_trait]
impl ProgressReporter for JobProgress {
    async fn report(&self, progress: u8) -> QueueResult<()> {
        self.states.update_progress(&self.job_id, progress).await
    }
}

/// Drives one work item from stored source to stored archive.
#[derive(Clone)]
pub struct VideoProcessor {
    storage: StorageGateway,
    records: Arc<dyn JobRecordStore>,
    transformer: Arc<dyn MediaTransformer>,
    output_file_name: String,
}

impl VideoProcessor {
    pub fn new(
        storage: StorageGateway,
        records: Arc<dyn JobRecordStore>,
        transformer: Arc<dyn MediaTransformer>,
        output_file_name: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            records,
            transformer,
            output_file_name: output_file_name.into(),
        }
    }

    /// Any failure leaves the record in `ERROR`; a failure to write that is
    /// only logged so the original cause is what the caller sees.
    pub async fn process(
        &self,
        message: &QueueMessage,
        progress: &dyn ProgressReporter,
    ) -> Result<ProcessingOutput, ProcessingError> {
        match self.run(message, progress).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!(video_id = %message.work_item_id, "❌ {}", e);
                if let Err(persist) = self.records.transition(message.work_item_id, VideoStatus::Error).await {
                    warn!(video_id = %message.work_item_id, "Could not mark video as ERROR: {}", persist);
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        message: &QueueMessage,
        progress: &dyn ProgressReporter,
    ) -> Result<ProcessingOutput, ProcessingError> {
        let id = message.work_item_id;
        let source_key = object_key(&message.owner_id, id, &message.source_name);
        let output_key = object_key(&message.owner_id, id, &self.output_file_name);

        let record = self
            .records
            .find_by_id(id)
            .await?
            .ok_or(RepositoryError::NotFound(id))?;

        // Redelivered after completion: hand back what is already stored.
        if record.status == VideoStatus::Completed {
            return self.stored_output(&output_key).await;
        }

        let source = match self.storage.get(&source_key).await {
            Ok(artifact) => artifact.body.filter(|body| !body.is_empty()),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        }
        .ok_or_else(|| ProcessingError::SourceMissing(source_key.clone()))?;

        self.records.transition(id, VideoStatus::Processing).await?;
        progress.report(10).await?;

        info!(video_id = %id, bytes = source.len(), "🎞️ Extracting frames");
        let frames = self.transformer.extract(&source).await?;
        progress.report(60).await?;

        let archive = self.transformer.pack(&frames).await?;
        progress.report(80).await?;

        self.storage
            .put(&output_key, Bytes::from(archive), Some(ARCHIVE_CONTENT_TYPE))
            .await?;
        progress.report(100).await?;

        self.records.transition(id, VideoStatus::Completed).await?;
        info!(video_id = %id, frames = frames.len(), "✅ Video processed");

        Ok(self.output(&output_key))
    }

    async fn stored_output(&self, output_key: &str) -> Result<ProcessingOutput, ProcessingError> {
        match self.storage.get(output_key).await {
            Ok(artifact) if artifact.body.as_ref().is_some_and(|body| !body.is_empty()) => {
                info!(key = %output_key, "Video already completed, skipping");
                Ok(self.output(output_key))
            }
            Ok(_) => Err(ProcessingError::ArchiveMissing(output_key.to_string())),
            Err(e) if e.is_not_found() => Err(ProcessingError::ArchiveMissing(output_key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn output(&self, output_key: &str) -> ProcessingOutput {
        ProcessingOutput {
            file_name: self.output_file_name.clone(),
            stored_path: self.storage.locate(output_key),
        }
    }
}
