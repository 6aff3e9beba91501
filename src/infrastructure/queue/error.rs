use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Corrupt job state for {job_id}: {reason}")]
    CorruptState { job_id: String, reason: String },
}

impl QueueError {
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn corrupt(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptState {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }
}
