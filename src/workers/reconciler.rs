//! Settles work items whose job went missing or stopped.
//!
//! Covers an enqueue that failed after the record was written and a worker
//! that died mid-job. The job-state store decides whether an item is still in
//! flight: waiting and delayed jobs belong to the broker, and an active job
//! is alive as long as it keeps updating.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::settings::ReconcileConfig;
use crate::infrastructure::queue::state::{now_millis, JobSnapshot, JobState, JobStateStore};
use crate::modules::video::error::VideoError;
use crate::modules::video::model::{Video, VideoStatus};
use crate::modules::video::repository::JobRecordStore;
use crate::modules::video::service::VideoService;

const SWEEP_BATCH: i64 = 100;

pub const ABANDONED_REASON: &str = "processing failed: worker stopped responding";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    InFlight,
    Resubmit,
    Abandon,
}

fn verdict(job: Option<&JobSnapshot>, quiet_since_ms: i64) -> Verdict {
    match job {
        None => Verdict::Resubmit,
        Some(job) if job.state.is_terminal() => Verdict::Resubmit,
        Some(job) if job.state == JobState::Active && job.updated_at < quiet_since_ms => Verdict::Abandon,
        Some(_) => Verdict::InFlight,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub resubmitted: usize,
    pub abandoned: usize,
    pub in_flight: usize,
}

pub struct Reconciler {
    service: VideoService,
    records: Arc<dyn JobRecordStore>,
    jobs: Arc<dyn JobStateStore>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        service: VideoService,
        records: Arc<dyn JobRecordStore>,
        jobs: Arc<dyn JobStateStore>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            service,
            records,
            jobs,
            config,
        }
    }

    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Reconciler is disabled");
            return;
        }

        info!(
            "Starting reconciler (interval: {:?}, stale after: {:?})",
            self.config.interval, self.config.stale_after
        );

        let mut ticker = interval(self.config.interval);
        loop {
            ticker.tick().await;

            match self.sweep().await {
                Ok(report) if report.resubmitted + report.abandoned > 0 => info!(
                    resubmitted = report.resubmitted,
                    abandoned = report.abandoned,
                    "🔄 Reconciled stale videos"
                ),
                Ok(_) => {}
                Err(e) => error!("Reconciliation sweep failed: {}", e),
            }
        }
    }

    /// One pass over the oldest unsettled items.
    pub async fn sweep(&self) -> Result<SweepReport, VideoError> {
        let stale_after = self.config.stale_after;
        let cutoff = OffsetDateTime::now_utc() - stale_after;
        let quiet_since_ms = now_millis() - stale_after.as_millis() as i64;
        let stale = self.records.find_unsettled(cutoff, SWEEP_BATCH).await?;

        let mut report = SweepReport::default();
        for video in stale {
            let job_id = video.id.to_string();
            let job = match self.jobs.get(&job_id).await {
                Ok(job) => job,
                Err(e) => {
                    error!(video_id = %video.id, "Could not read job state: {}", e);
                    continue;
                }
            };

            let still_open = match verdict(job.as_ref(), quiet_since_ms) {
                Verdict::InFlight => {
                    report.in_flight += 1;
                    true
                }
                Verdict::Resubmit => {
                    let done = self.resubmit(&video).await;
                    report.resubmitted += usize::from(done);
                    done
                }
                Verdict::Abandon => {
                    if self.abandon(&video, &job_id).await {
                        report.abandoned += 1;
                    }
                    false
                }
            };

            // Rotates the batch so a long backlog of queued items is not re-read every pass.
            if still_open {
                if let Err(e) = self.records.touch(video.id).await {
                    warn!(video_id = %video.id, "Could not refresh stale video: {}", e);
                }
            }
        }

        Ok(report)
    }

    async fn resubmit(&self, video: &Video) -> bool {
        warn!(
            video_id = %video.id,
            status = %video.status,
            updated_at = %video.updated_at,
            "Detected stale video without a live job"
        );

        match self.service.submit(video).await {
            Ok(job_id) => {
                info!(video_id = %video.id, job_id = %job_id, "Re-submitted stale video");
                true
            }
            Err(e) => {
                error!(video_id = %video.id, "Failed to re-submit stale video: {}", e);
                false
            }
        }
    }

    async fn abandon(&self, video: &Video, job_id: &str) -> bool {
        warn!(video_id = %video.id, job_id, "Detected stale job (no progress)");

        if let Err(e) = self.jobs.mark_failed(job_id, ABANDONED_REASON).await {
            error!(job_id, "Failed to mark stale job failed: {}", e);
            return false;
        }
        if let Err(e) = self.records.transition(video.id, VideoStatus::Error).await {
            error!(video_id = %video.id, "Failed to mark stale video as ERROR: {}", e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use uuid::Uuid;

    use crate::infrastructure::queue::job::{JobEnvelope, RetryPolicy};
    use crate::modules::video::service::job_for;
    use crate::modules::video::validator::{UploadDescriptor, UploadValidator};
    use crate::testing::{FakeTransformer, Harness};
    use crate::workers::consumer::{Disposition, JobRunner};
    use crate::workers::processor::VideoProcessor;

    fn service(h: &Harness) -> VideoService {
        VideoService::new(
            UploadValidator::system(),
            h.storage.clone(),
            h.records.clone(),
            h.queue.clone(),
            h.states.clone(),
            h.config.clone(),
        )
    }

    fn reconciler(h: &Harness) -> Reconciler {
        Reconciler::new(
            service(h),
            h.records.clone(),
            h.states.clone(),
            ReconcileConfig {
                enabled: true,
                interval: Duration::from_secs(60),
                stale_after: Duration::from_secs(900),
            },
        )
    }

    fn runner(h: &Harness) -> JobRunner {
        let processor = VideoProcessor::new(
            h.storage.clone(),
            h.records.clone(),
            Arc::new(FakeTransformer::new(2)),
            "output.zip",
        );
        JobRunner::new(processor, h.states.clone(), h.queue.clone())
    }

    fn video(status: VideoStatus, age: time::Duration) -> Video {
        let at = OffsetDateTime::now_utc() - age;
        Video {
            id: Uuid::new_v4(),
            owner_id: "u1".to_string(),
            file_name: "video.mp4".to_string(),
            extension: "mp4".to_string(),
            size_bytes: 1,
            status,
            created_at: at,
            updated_at: at,
        }
    }

    async fn accepted(h: &Harness) -> (Uuid, String) {
        let upload = UploadDescriptor {
            size_bytes: 4,
            file_name: "video.mp4".to_string(),
            content_type: Some("video/mp4".to_string()),
        };
        let response = service(h)
            .enqueue(upload, Bytes::from_static(b"data"), "u1")
            .await
            .unwrap();
        (response.work_item_id, response.job_id)
    }

    fn age(h: &Harness, id: Uuid, minutes: i64) {
        h.records
            .set_updated_at(id, OffsetDateTime::now_utc() - time::Duration::minutes(minutes));
    }

    #[tokio::test]
    async fn items_without_a_job_are_resubmitted() {
        let h = Harness::new();
        let stuck_pending = video(VideoStatus::Pending, time::Duration::hours(1));
        let stuck_processing = video(VideoStatus::Processing, time::Duration::hours(2));
        h.records.insert(stuck_pending.clone());
        h.records.insert(stuck_processing.clone());

        let report = reconciler(&h).sweep().await.unwrap();
        assert_eq!(report.resubmitted, 2);

        let queued = h.queue.enqueued();
        assert_eq!(queued.len(), 2);
        // Oldest first, under the item's own job id.
        assert_eq!(queued[0].job_id, stuck_processing.id.to_string());
        assert_eq!(queued[1].job_id, stuck_pending.id.to_string());
        assert!(queued.iter().all(|job| job.attempt == 1));

        // Touched, so the next sweep leaves them alone.
        assert_eq!(reconciler(&h).sweep().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn queued_backlog_is_not_resubmitted() {
        let h = Harness::new();
        let (id, job_id) = accepted(&h).await;
        age(&h, id, 20);

        let report = reconciler(&h).sweep().await.unwrap();
        assert_eq!(report.resubmitted, 0);
        assert_eq!(report.in_flight, 1);
        assert_eq!(h.queue.enqueued().len(), 1);

        let queued = h.queue.enqueued().remove(0);
        assert_eq!(runner(&h).run(&queued).await, Disposition::Completed);
        assert_eq!(
            h.records.history(id),
            vec![VideoStatus::Pending, VideoStatus::Processing, VideoStatus::Completed]
        );
        assert_eq!(h.states.snapshot(&job_id).unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn busy_worker_is_left_alone() {
        let h = Harness::new();
        let (id, job_id) = accepted(&h).await;
        h.states.mark_active(&job_id, 1).await.unwrap();
        h.records.transition(id, VideoStatus::Processing).await.unwrap();
        age(&h, id, 20);

        let report = reconciler(&h).sweep().await.unwrap();
        assert_eq!(report.in_flight, 1);
        assert_eq!(h.states.snapshot(&job_id).unwrap().state, JobState::Active);
        assert_eq!(h.records.get(id).unwrap().status, VideoStatus::Processing);
    }

    #[tokio::test]
    async fn silent_worker_settles_the_callers_job() {
        let h = Harness::new();
        let (id, job_id) = accepted(&h).await;
        h.states.mark_active(&job_id, 1).await.unwrap();
        h.records.transition(id, VideoStatus::Processing).await.unwrap();
        age(&h, id, 20);
        h.states.set_updated_at(&job_id, now_millis() - 20 * 60 * 1000);

        let report = reconciler(&h).sweep().await.unwrap();
        assert_eq!(report.abandoned, 1);
        assert_eq!(h.queue.enqueued().len(), 1);

        let status = service(&h).status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().starts_with("processing failed: "));
        assert_eq!(h.records.get(id).unwrap().status, VideoStatus::Error);
    }

    #[tokio::test]
    async fn lost_job_is_resubmitted_under_the_same_id() {
        let h = Harness::new();
        let (id, job_id) = accepted(&h).await;
        h.states.forget(&job_id);
        age(&h, id, 20);

        let report = reconciler(&h).sweep().await.unwrap();
        assert_eq!(report.resubmitted, 1);

        let resubmitted: JobEnvelope = h.queue.enqueued().pop().unwrap();
        assert_eq!(resubmitted.job_id, job_id);
        assert_eq!(runner(&h).run(&resubmitted).await, Disposition::Completed);

        let status = service(&h).status(&job_id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, "100%");
    }

    #[tokio::test]
    async fn unpublished_job_is_resubmitted() {
        let h = Harness::new();
        h.queue.fail_enqueue();
        let upload = UploadDescriptor {
            size_bytes: 4,
            file_name: "video.mp4".to_string(),
            content_type: None,
        };
        assert!(service(&h).enqueue(upload, Bytes::from_static(b"data"), "u1").await.is_err());
        h.queue.restore_enqueue();

        let stuck = h.records.list_by_owner("u1").await.unwrap().remove(0);
        age(&h, stuck.id, 20);

        assert_eq!(reconciler(&h).sweep().await.unwrap().resubmitted, 1);
        let job = h.states.snapshot(&stuck.id.to_string()).unwrap();
        assert_eq!(job.state, JobState::Waiting);
    }

    #[tokio::test]
    async fn fresh_and_settled_items_are_left_alone() {
        let h = Harness::new();
        h.records.insert(video(VideoStatus::Pending, time::Duration::seconds(30)));
        h.records.insert(video(VideoStatus::Completed, time::Duration::hours(5)));
        h.records.insert(video(VideoStatus::Error, time::Duration::hours(5)));

        assert_eq!(reconciler(&h).sweep().await.unwrap(), SweepReport::default());
        assert!(h.queue.enqueued().is_empty());
    }

    #[tokio::test]
    async fn failed_submission_is_retried_next_sweep() {
        let h = Harness::new();
        let stuck = video(VideoStatus::Pending, time::Duration::hours(1));
        h.records.insert(stuck.clone());
        h.queue.fail_enqueue();

        assert_eq!(reconciler(&h).sweep().await.unwrap().resubmitted, 0);
        assert_eq!(h.records.get(stuck.id).unwrap().updated_at, stuck.updated_at);
    }

    #[test]
    fn verdicts() {
        let stuck = video(VideoStatus::Processing, time::Duration::hours(1));
        let mut job = JobSnapshot::waiting(&job_for(&stuck, RetryPolicy::exponential(3, 1000)));
        let quiet_since = job.updated_at - 1;

        assert_eq!(verdict(None, quiet_since), Verdict::Resubmit);
        assert_eq!(verdict(Some(&job), quiet_since), Verdict::InFlight);

        job.state = JobState::Delayed;
        assert_eq!(verdict(Some(&job), job.updated_at + 1), Verdict::InFlight);

        job.state = JobState::Active;
        assert_eq!(verdict(Some(&job), quiet_since), Verdict::InFlight);
        assert_eq!(verdict(Some(&job), job.updated_at + 1), Verdict::Abandon);

        job.state = JobState::Failed;
        assert_eq!(verdict(Some(&job), quiet_since), Verdict::Resubmit);
    }
}
