//! In-memory stand-ins for the Postgres, Redis and broker seams.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::settings::AppConfig;
use crate::infrastructure::media::archive::pack_frames;
use crate::infrastructure::media::error::{TransformError, TransformResult};
use crate::infrastructure::media::{Frame, MediaTransformer};
use crate::infrastructure::queue::error::{QueueError, QueueResult};
use crate::infrastructure::queue::job::JobEnvelope;
use crate::infrastructure::queue::state::{now_millis, JobSnapshot, JobState, JobStateStore};
use crate::infrastructure::queue::JobQueue;
use crate::infrastructure::storage::local::LocalStorage;
use crate::infrastructure::storage::StorageGateway;
use crate::modules::video::model::{Video, VideoStatus};
use crate::modules::video::repository::{JobRecordStore, RepositoryError, RepositoryResult};

#[derive(Default)]
pub struct MemoryJobRecordStore {
    videos: Mutex<HashMap<Uuid, Video>>,
    history: Mutex<Vec<(Uuid, VideoStatus)>>,
    fail_create: AtomicBool,
    fail_transitions: AtomicUsize,
}

impl MemoryJobRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, video: Video) {
        self.history.lock().unwrap().push((video.id, video.status));
        self.videos.lock().unwrap().insert(video.id, video);
    }

    pub fn get(&self, id: Uuid) -> Option<Video> {
        self.videos.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.videos.lock().unwrap().len()
    }

    /// Every status written for `id`, creation included, in order.
    pub fn history(&self, id: Uuid) -> Vec<VideoStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(video_id, _)| *video_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// The next `n` transitions fail as if the database were unreachable.
    pub fn fail_next_transitions(&self, n: usize) {
        self.fail_transitions.store(n, Ordering::SeqCst);
    }

    pub fn set_updated_at(&self, id: Uuid, at: OffsetDateTime) {
        if let Some(video) = self.videos.lock().unwrap().get_mut(&id) {
            video.updated_at = at;
        }
    }
}

#[async_trait]
impl JobRecordStore for MemoryJobRecordStore {
    async fn create(&self, video: &Video) -> RepositoryResult<Video> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        self.insert(video.clone());
        Ok(video.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Video>> {
        Ok(self.get(id))
    }

    async fn list_by_owner(&self, owner_id: &str) -> RepositoryResult<Vec<Video>> {
        let mut videos: Vec<Video> = self
            .videos
            .lock()
            .unwrap()
            .values()
            .filter(|video| video.owner_id == owner_id)
            .cloned()
            .collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(videos)
    }

    async fn transition(&self, id: Uuid, next: VideoStatus) -> RepositoryResult<Video> {
        let pending_failures = self.fail_transitions.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_transitions.store(pending_failures - 1, Ordering::SeqCst);
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut videos = self.videos.lock().unwrap();
        let video = videos.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;

        if !video.status.can_transition_to(next) {
            return Err(RepositoryError::InvalidTransition {
                id,
                from: video.status,
                to: next,
            });
        }

        video.status = next;
        video.updated_at = OffsetDateTime::now_utc();
        self.history.lock().unwrap().push((id, next));
        Ok(video.clone())
    }

    async fn find_unsettled(&self, older_than: OffsetDateTime, limit: i64) -> RepositoryResult<Vec<Video>> {
        let mut videos: Vec<Video> = self
            .videos
            .lock()
            .unwrap()
            .values()
            .filter(|video| !video.status.is_terminal() && video.updated_at < older_than)
            .cloned()
            .collect();
        videos.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        videos.truncate(limit.max(0) as usize);
        Ok(videos)
    }

    async fn touch(&self, id: Uuid) -> RepositoryResult<()> {
        let mut videos = self.videos.lock().unwrap();
        match videos.get_mut(&id) {
            Some(video) if !video.status.is_terminal() => {
                video.updated_at = OffsetDateTime::now_utc();
                Ok(())
            }
            _ => Err(RepositoryError::NotFound(id)),
        }
    }
}

#[derive(Default)]
pub struct MemoryJobStateStore {
    jobs: Mutex<HashMap<String, JobSnapshot>>,
    progress: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryJobStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.lock().unwrap().get(job_id).cloned()
    }

    /// Progress values reported for `job_id`, in order.
    pub fn progress_log(&self, job_id: &str) -> Vec<u8> {
        self.progress
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Backdates the job's last update, as if its worker went quiet at `at_millis`.
    pub fn set_updated_at(&self, job_id: &str, at_millis: i64) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(job_id) {
            job.updated_at = at_millis;
        }
    }

    pub fn forget(&self, job_id: &str) {
        self.jobs.lock().unwrap().remove(job_id);
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobSnapshot)) -> QueueResult<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        apply(job);
        job.updated_at = now_millis();
        Ok(())
    }
}

#[async_trait]
impl JobStateStore for MemoryJobStateStore {
    async fn register(&self, envelope: &JobEnvelope) -> QueueResult<()> {
        self.jobs
            .lock()
            .unwrap()
            .insert(envelope.job_id.clone(), JobSnapshot::waiting(envelope));
        Ok(())
    }

    async fn mark_active(&self, job_id: &str, attempt: u32) -> QueueResult<()> {
        self.update(job_id, |job| {
            job.state = JobState::Active;
            job.attempt = attempt;
            job.progress = 0;
        })
    }

    async fn update_progress(&self, job_id: &str, progress: u8) -> QueueResult<()> {
        self.update(job_id, |job| job.progress = progress.min(100))?;
        self.progress
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .push(progress);
        Ok(())
    }

    async fn mark_completed(&self, job_id: &str, result: &serde_json::Value) -> QueueResult<()> {
        self.update(job_id, |job| {
            job.state = JobState::Completed;
            job.progress = 100;
            job.result = Some(result.clone());
            job.failed_reason = None;
        })
    }

    async fn mark_delayed(&self, job_id: &str, reason: &str) -> QueueResult<()> {
        self.update(job_id, |job| {
            job.state = JobState::Delayed;
            job.failed_reason = Some(reason.to_string());
        })
    }

    async fn mark_failed(&self, job_id: &str, reason: &str) -> QueueResult<()> {
        self.update(job_id, |job| {
            job.state = JobState::Failed;
            job.failed_reason = Some(reason.to_string());
        })
    }

    async fn get(&self, job_id: &str) -> QueueResult<Option<JobSnapshot>> {
        Ok(self.snapshot(job_id))
    }
}

/// Queue that registers jobs like the broker-backed one but only records publications.
pub struct RecordingJobQueue {
    states: Arc<MemoryJobStateStore>,
    enqueued: Mutex<Vec<JobEnvelope>>,
    retried: Mutex<Vec<(JobEnvelope, Duration)>>,
    fail_enqueue: AtomicBool,
}

impl RecordingJobQueue {
    pub fn new(states: Arc<MemoryJobStateStore>) -> Self {
        Self {
            states,
            enqueued: Mutex::new(Vec::new()),
            retried: Mutex::new(Vec::new()),
            fail_enqueue: AtomicBool::new(false),
        }
    }

    pub fn enqueued(&self) -> Vec<JobEnvelope> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn retried(&self) -> Vec<(JobEnvelope, Duration)> {
        self.retried.lock().unwrap().clone()
    }

    pub fn fail_enqueue(&self) {
        self.fail_enqueue.store(true, Ordering::SeqCst);
    }

    pub fn restore_enqueue(&self) {
        self.fail_enqueue.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobQueue for RecordingJobQueue {
    async fn enqueue(&self, envelope: &JobEnvelope) -> QueueResult<()> {
        self.states.register(envelope).await?;
        if self.fail_enqueue.load(Ordering::SeqCst) {
            self.states
                .mark_failed(&envelope.job_id, "processing failed: job was not submitted")
                .await?;
            return Err(QueueError::invalid_payload("broker unavailable"));
        }
        self.enqueued.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    async fn schedule_retry(&self, envelope: &JobEnvelope, delay: Duration) -> QueueResult<()> {
        self.retried.lock().unwrap().push((envelope.clone(), delay));
        Ok(())
    }
}

/// Emits `frames` fixed stills per input, or fails with `NoFrames` when `frames == 0`.
pub struct FakeTransformer {
    frames: usize,
    calls: AtomicUsize,
}

impl FakeTransformer {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransformer for FakeTransformer {
    async fn extract(&self, source: &[u8]) -> TransformResult<Vec<Frame>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.frames == 0 {
            return Err(TransformError::NoFrames);
        }
        Ok((1..=self.frames)
            .map(|i| Frame {
                name: format!("frame-{:05}.png", i),
                data: vec![(source.len() % 251) as u8, i as u8],
            })
            .collect())
    }

    async fn pack(&self, frames: &[Frame]) -> TransformResult<Vec<u8>> {
        pack_frames(frames)
    }
}

/// Wiring shared by the service and worker tests.
pub struct Harness {
    pub config: Arc<AppConfig>,
    pub storage: StorageGateway,
    pub records: Arc<MemoryJobRecordStore>,
    pub states: Arc<MemoryJobStateStore>,
    pub queue: Arc<RecordingJobQueue>,
    _root: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let config = Arc::new(AppConfig::for_tests(root.path()));
        let storage = StorageGateway::new(
            Arc::new(LocalStorage::new(root.path())),
            config.storage.bucket.clone(),
        );
        let states = Arc::new(MemoryJobStateStore::new());

        Self {
            config,
            storage,
            records: Arc::new(MemoryJobRecordStore::new()),
            queue: Arc::new(RecordingJobQueue::new(states.clone())),
            states,
            _root: root,
        }
    }
}

pub const FORM_BOUNDARY: &str = "frame-pipeline-boundary";

/// Hand-built `multipart/form-data` body.
#[derive(Default)]
pub struct MultipartForm {
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(self, name: &str, value: &str) -> Self {
        self.part(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n", name),
            value.as_bytes(),
        )
    }

    pub fn file(self, name: &str, file_name: Option<&str>, content_type: Option<&str>, data: &[u8]) -> Self {
        let mut headers = match file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                name, file_name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", name),
        };
        if let Some(content_type) = content_type {
            headers.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        self.part(headers, data)
    }

    fn part(mut self, headers: String, data: &[u8]) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\n{}\r\n", FORM_BOUNDARY, headers).as_bytes());
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn into_request(mut self, uri: &str) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", FORM_BOUNDARY).as_bytes());
        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", FORM_BOUNDARY),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}
