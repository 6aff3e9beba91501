use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

pub mod error;
pub mod job;
pub mod rabbitmq;
pub mod state;

use error::QueueResult;
use job::JobEnvelope;
use rabbitmq::RabbitMqService;
use state::JobStateStore;

/// Submission side of the work queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Registers the job as `waiting` and hands it to the broker. A job the
    /// broker refused is left `failed` so it never reads as in flight.
    async fn enqueue(&self, envelope: &JobEnvelope) -> QueueResult<()>;

    /// Redelivers `envelope` once `delay` has passed.
    async fn schedule_retry(&self, envelope: &JobEnvelope, delay: Duration) -> QueueResult<()>;
}

#[derive(Clone)]
pub struct BrokerJobQueue {
    rabbit: RabbitMqService,
    states: Arc<dyn JobStateStore>,
    queue_name: String,
    retry_queue_name: String,
}

impl BrokerJobQueue {
    pub fn new(
        rabbit: RabbitMqService,
        states: Arc<dyn JobStateStore>,
        queue_name: impl Into<String>,
        retry_queue_name: impl Into<String>,
    ) -> Self {
        Self {
            rabbit,
            states,
            queue_name: queue_name.into(),
            retry_queue_name: retry_queue_name.into(),
        }
    }
}

#[async_trait]
impl JobQueue for BrokerJobQueue {
    async fn enqueue(&self, envelope: &JobEnvelope) -> QueueResult<()> {
        let payload = envelope.to_bytes()?;

        self.states.register(envelope).await?;
        if let Err(e) = self.rabbit.publish(&self.queue_name, &payload).await {
            // A registered job that never reached the broker must not look in flight.
            let reason = format!("processing failed: job was not submitted: {}", e);
            if let Err(settle) = self.states.mark_failed(&envelope.job_id, &reason).await {
                warn!(job_id = %envelope.job_id, "Could not settle unsubmitted job: {}", settle);
            }
            return Err(e);
        }

        info!(
            job_id = %envelope.job_id,
            video_id = %envelope.message.work_item_id,
            "📤 Job enqueued on '{}'", self.queue_name
        );
        Ok(())
    }

    async fn schedule_retry(&self, envelope: &JobEnvelope, delay: Duration) -> QueueResult<()> {
        let payload = envelope.to_bytes()?;
        self.rabbit
            .publish_delayed(&self.retry_queue_name, &payload, delay)
            .await?;

        info!(
            job_id = %envelope.job_id,
            attempt = envelope.attempt,
            delay_ms = delay.as_millis() as u64,
            "🔁 Job scheduled for redelivery"
        );
        Ok(())
    }
}
