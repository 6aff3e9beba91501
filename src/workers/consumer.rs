use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::processor::{JobProgress, VideoProcessor};
use crate::infrastructure::queue::error::{QueueError, QueueResult};
use crate::infrastructure::queue::job::JobEnvelope;
use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::infrastructure::queue::state::JobStateStore;
use crate::infrastructure::queue::JobQueue;

const CONSUMER_TAG: &str = "frame_worker";

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Retrying { attempt: u32, delay: Duration },
    Failed,
}

/// Runs a single job and settles its runtime state. Knows nothing about AMQP.
pub struct JobRunner {
    processor: VideoProcessor,
    states: Arc<dyn JobStateStore>,
    queue: Arc<dyn JobQueue>,
}

impl JobRunner {
    pub fn new(processor: VideoProcessor, states: Arc<dyn JobStateStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            processor,
            states,
            queue,
        }
    }

    pub async fn run(&self, envelope: &JobEnvelope) -> Disposition {
        let job_id = envelope.job_id.as_str();

        match self.states.mark_active(job_id, envelope.attempt).await {
            Ok(()) => {}
            // Expired or never registered: recreate it so status queries keep working.
            Err(QueueError::JobNotFound(_)) => {
                let restored = match self.states.register(envelope).await {
                    Ok(()) => self.states.mark_active(job_id, envelope.attempt).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = restored {
                    warn!(job_id, "Could not restore job state: {}", e);
                }
            }
            Err(e) => warn!(job_id, "Could not mark job active: {}", e),
        }

        info!(
            job_id,
            video_id = %envelope.message.work_item_id,
            attempt = envelope.attempt,
            max_attempts = envelope.policy.attempts,
            "📦 Processing job"
        );

        let progress = JobProgress::new(self.states.clone(), job_id);
        let failure = match self.processor.process(&envelope.message, &progress).await {
            Ok(output) => {
                let settled = match serde_json::to_value(&output) {
                    Ok(result) => self.states.mark_completed(job_id, &result).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = settled {
                    warn!(job_id, "Could not mark job completed: {}", e);
                }
                return Disposition::Completed;
            }
            Err(e) => e,
        };

        let reason = failure.to_string();

        if failure.is_retryable() && envelope.has_attempts_left() {
            let delay = envelope.retry_delay();
            let next = envelope.next_attempt();

            if let Err(e) = self.states.mark_delayed(job_id, &reason).await {
                warn!(job_id, "Could not mark job delayed: {}", e);
            }

            match self.queue.schedule_retry(&next, delay).await {
                Ok(()) => {
                    return Disposition::Retrying {
                        attempt: next.attempt,
                        delay,
                    };
                }
                Err(e) => error!(job_id, "Could not schedule retry: {}", e),
            }
        }

        error!(job_id, attempt = envelope.attempt, "❌ Job failed: {}", reason);
        if let Err(e) = self.states.mark_failed(job_id, &reason).await {
            warn!(job_id, "Could not mark job failed: {}", e);
        }
        Disposition::Failed
    }
}

/// Pulls jobs off the work queue with at most `concurrency` in flight.
pub struct WorkerPool {
    rabbit: RabbitMqService,
    runner: Arc<JobRunner>,
    queue_name: String,
    retry_queue_name: String,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        rabbit: RabbitMqService,
        runner: JobRunner,
        queue_name: impl Into<String>,
        retry_queue_name: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            rabbit,
            runner: Arc::new(runner),
            queue_name: queue_name.into(),
            retry_queue_name: retry_queue_name.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Consumes until the broker closes the stream.
    pub async fn run(&self) -> QueueResult<()> {
        let prefetch = u16::try_from(self.concurrency).unwrap_or(u16::MAX);
        let mut consumer = self
            .rabbit
            .consumer(&self.queue_name, &self.retry_queue_name, CONSUMER_TAG, prefetch)
            .await?;
        let permits = Arc::new(Semaphore::new(self.concurrency));

        info!(
            concurrency = self.concurrency,
            "🎥 Frame worker listening on '{}'", self.queue_name
        );

        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!("Consumer error: {}", e);
                    return Err(e.into());
                }
            };

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let runner = self.runner.clone();

            tokio::spawn(async move {
                handle_delivery(&runner, delivery).await;
                drop(permit);
            });
        }

        warn!("Consumer stream for '{}' ended", self.queue_name);
        Ok(())
    }

    /// Restarts the consumer whenever it stops, waiting `backoff` in between.
    pub async fn run_forever(self, backoff: Duration) {
        loop {
            if let Err(e) = self.run().await {
                error!("Frame worker stopped: {}", e);
            }
            tokio::time::sleep(backoff).await;
        }
    }
}

async fn handle_delivery(runner: &JobRunner, delivery: Delivery) {
    let envelope = match JobEnvelope::from_bytes(&delivery.data) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("❌ Dropping malformed job: {}", e);
            let options = BasicNackOptions {
                requeue: false,
                ..BasicNackOptions::default()
            };
            if let Err(e) = delivery.nack(options).await {
                error!("Failed to nack message: {}", e);
            }
            return;
        }
    };

    runner.run(&envelope).await;

    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!(job_id = %envelope.job_id, "Failed to ack message: {}", e);
    }
}
