//! In-flight job state, kept in Redis next to the broker.
//!
//! This is the queue runtime's view of a job (waiting, active, delayed, ...).
//! The durable outcome of a work item lives in the record store instead.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::infrastructure::queue::error::{QueueError, QueueResult};
use crate::infrastructure::queue::job::JobEnvelope;
use crate::infrastructure::redis::client::RedisService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Delayed => "delayed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "delayed" => Ok(JobState::Delayed),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub work_item_id: Uuid,
    pub state: JobState,
    pub progress: u8,
    /// Attempt currently running, or the last one that ran.
    pub attempt: u32,
    pub max_attempts: u32,
    pub result: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
    /// Unix milliseconds.
    pub updated_at: i64,
}

impl JobSnapshot {
    pub fn waiting(envelope: &JobEnvelope) -> Self {
        Self {
            id: envelope.job_id.clone(),
            work_item_id: envelope.message.work_item_id,
            state: JobState::Waiting,
            progress: 0,
            attempt: 0,
            max_attempts: envelope.policy.attempts,
            result: None,
            failed_reason: None,
            updated_at: now_millis(),
        }
    }
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[async_trait]
pub trait JobStateStore: Send + Sync {
    async fn register(&self, envelope: &JobEnvelope) -> QueueResult<()>;

    async fn mark_active(&self, job_id: &str, attempt: u32) -> QueueResult<()>;

    async fn update_progress(&self, job_id: &str, progress: u8) -> QueueResult<()>;

    async fn mark_completed(&self, job_id: &str, result: &serde_json::Value) -> QueueResult<()>;

    /// Failed attempt that will be redelivered after a backoff.
    async fn mark_delayed(&self, job_id: &str, reason: &str) -> QueueResult<()>;

    async fn mark_failed(&self, job_id: &str, reason: &str) -> QueueResult<()>;

    async fn get(&self, job_id: &str) -> QueueResult<Option<JobSnapshot>>;
}

#[derive(Clone)]
pub struct RedisJobStateStore {
    redis: RedisService,
    prefix: String,
    retention: Duration,
}

impl RedisJobStateStore {
    pub fn new(redis: RedisService, queue_name: &str, retention: Duration) -> Self {
        Self {
            redis,
            prefix: format!("{}:job", queue_name),
            retention,
        }
    }

    fn key(&self, job_id: &str) -> String {
        format!("{}:{}", self.prefix, job_id)
    }

    /// Writes fields onto an existing job hash; unknown jobs are an error.
    async fn update(&self, job_id: &str, fields: Vec<(&'static str, String)>, terminal: bool) -> QueueResult<()> {
        let key = self.key(job_id);
        let mut conn = self.redis.get_conn().await?;

        let exists: bool = conn.exists(&key).await?;
        if !exists {
            return Err(QueueError::JobNotFound(job_id.to_string()));
        }

        let mut fields = fields;
        fields.push(("updated_at", now_millis().to_string()));

        let mut pipe = redis::pipe();
        pipe.atomic().hset_multiple(&key, &fields).ignore();
        if terminal {
            pipe.expire(&key, self.retention.as_secs() as i64).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        debug!(job_id, ?fields, "Job state updated");
        Ok(())
    }
}

#[async_trait]
impl JobStateStore for RedisJobStateStore {
    async fn register(&self, envelope: &JobEnvelope) -> QueueResult<()> {
        let key = self.key(&envelope.job_id);
        let mut conn = self.redis.get_conn().await?;
        let snapshot = JobSnapshot::waiting(envelope);

        let fields = vec![
            ("state", snapshot.state.as_str().to_string()),
            ("progress", "0".to_string()),
            ("attempt", "0".to_string()),
            ("max_attempts", snapshot.max_attempts.to_string()),
            ("work_item_id", snapshot.work_item_id.to_string()),
            ("updated_at", snapshot.updated_at.to_string()),
        ];

        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn mark_active(&self, job_id: &str, attempt: u32) -> QueueResult<()> {
        self.update(
            job_id,
            vec![
                ("state", JobState::Active.as_str().to_string()),
                ("attempt", attempt.to_string()),
                ("progress", "0".to_string()),
            ],
            false,
        )
        .await
    }

    async fn update_progress(&self, job_id: &str, progress: u8) -> QueueResult<()> {
        self.update(job_id, vec![("progress", progress.min(100).to_string())], false)
            .await
    }

    async fn mark_completed(&self, job_id: &str, result: &serde_json::Value) -> QueueResult<()> {
        self.update(
            job_id,
            vec![
                ("state", JobState::Completed.as_str().to_string()),
                ("progress", "100".to_string()),
                ("result", result.to_string()),
                ("failed_reason", String::new()),
            ],
            true,
        )
        .await
    }

    async fn mark_delayed(&self, job_id: &str, reason: &str) -> QueueResult<()> {
        self.update(
            job_id,
            vec![
                ("state", JobState::Delayed.as_str().to_string()),
                ("failed_reason", reason.to_string()),
            ],
            false,
        )
        .await
    }

    async fn mark_failed(&self, job_id: &str, reason: &str) -> QueueResult<()> {
        self.update(
            job_id,
            vec![
                ("state", JobState::Failed.as_str().to_string()),
                ("failed_reason", reason.to_string()),
            ],
            true,
        )
        .await
    }

    async fn get(&self, job_id: &str) -> QueueResult<Option<JobSnapshot>> {
        let mut conn = self.redis.get_conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.key(job_id)).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        snapshot_from_fields(job_id, &fields).map(Some)
    }
}

fn snapshot_from_fields(job_id: &str, fields: &HashMap<String, String>) -> QueueResult<JobSnapshot> {
    fn field<'a>(job_id: &str, fields: &'a HashMap<String, String>, name: &str) -> QueueResult<&'a str> {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| QueueError::corrupt(job_id, format!("missing field '{}'", name)))
    }

    fn parsed<T: std::str::FromStr>(job_id: &str, fields: &HashMap<String, String>, name: &str) -> QueueResult<T> {
        field(job_id, fields, name)?
            .parse::<T>()
            .map_err(|_| QueueError::corrupt(job_id, format!("unparsable field '{}'", name)))
    }

    let state = field(job_id, fields, "state")?
        .parse::<JobState>()
        .map_err(|reason| QueueError::corrupt(job_id, reason))?;

    let result = match fields.get("result").filter(|raw| !raw.is_empty()) {
        Some(raw) => Some(serde_json::from_str(raw)?),
        None => None,
    };

    let failed_reason = fields
        .get("failed_reason")
        .filter(|reason| !reason.is_empty())
        .cloned();

    Ok(JobSnapshot {
        id: job_id.to_string(),
        work_item_id: parsed(job_id, fields, "work_item_id")?,
        state,
        progress: parsed(job_id, fields, "progress")?,
        attempt: parsed(job_id, fields, "attempt")?,
        max_attempts: parsed(job_id, fields, "max_attempts")?,
        result,
        failed_reason,
        updated_at: parsed(job_id, fields, "updated_at")?,
    })
}
