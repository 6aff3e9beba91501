use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::infrastructure::queue::error::QueueError;

/// How long to wait before redelivering a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    Exponential { delay_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total deliveries allowed, the first one included.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn exponential(attempts: u32, delay_ms: u64) -> Self {
        Self {
            attempts,
            backoff: Backoff::Exponential { delay_ms },
        }
    }

    /// Delay after the 1-based `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let millis = match self.backoff {
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { delay_ms } => {
                let factor = 2u64.checked_pow(attempt - 1).unwrap_or(u64::MAX);
                delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(millis)
    }
}

/// Payload handed to a worker. Everything beyond routing is re-read from the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQueueMessage")]
pub struct QueueMessage {
    pub work_item_id: Uuid,
    pub owner_id: String,
    pub source_name: String,
    /// Unix milliseconds.
    pub enqueued_at: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQueueMessage {
    work_item_id: Uuid,
    owner_id: String,
    source_name: String,
    enqueued_at: i64,
}

impl TryFrom<RawQueueMessage> for QueueMessage {
    type Error = QueueError;

    fn try_from(raw: RawQueueMessage) -> Result<Self, Self::Error> {
        if raw.owner_id.trim().is_empty() {
            return Err(QueueError::invalid_payload("owner_id is empty"));
        }
        if raw.source_name.trim().is_empty() {
            return Err(QueueError::invalid_payload("source_name is empty"));
        }
        if raw.source_name.contains('/') || raw.source_name.contains('\\') {
            return Err(QueueError::invalid_payload("source_name contains a path separator"));
        }
        if raw.enqueued_at < 0 {
            return Err(QueueError::invalid_payload("enqueued_at is negative"));
        }

        Ok(Self {
            work_item_id: raw.work_item_id,
            owner_id: raw.owner_id,
            source_name: raw.source_name,
            enqueued_at: raw.enqueued_at,
        })
    }
}

/// What actually travels over the broker.
///
/// A work item has exactly one job, so the job id is the work item id. Every
/// retry and every re-submission of the item reuses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: String,
    /// 1-based delivery attempt.
    pub attempt: u32,
    pub policy: RetryPolicy,
    pub message: QueueMessage,
}

impl JobEnvelope {
    pub fn new(message: QueueMessage, policy: RetryPolicy) -> Self {
        Self {
            job_id: message.work_item_id.to_string(),
            attempt: 1,
            policy,
            message,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.policy.attempts
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.policy.delay_for(self.attempt)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, QueueError> {
        let envelope: Self = serde_json::from_slice(payload)?;
        if envelope.job_id.trim().is_empty() {
            return Err(QueueError::invalid_payload("job_id is empty"));
        }
        if envelope.attempt == 0 || envelope.policy.attempts == 0 {
            return Err(QueueError::invalid_payload("attempt counters must start at 1"));
        }
        Ok(envelope)
    }
}
