use crate::adapters::local::EventHub;
use crate::application::backup::BackupManager;
use crate::application::encoder::{SegmentEncoder, MAX_ENCODE_ATTEMPTS};
use crate::application::ledger::SharedLedger;
use crate::domain::jobs::{Job, PipelineEvent, PreviewJob, SegmentJob};
use crate::error::{QueueError, StoreError};
use crate::ports::queue::JobQueuePort;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long an idle worker waits on the queue before polling again.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs encode, preview and backup jobs off the capture path.
pub struct WorkerService {
    queue: Arc<dyn JobQueuePort>,
    encoder: Arc<SegmentEncoder>,
    backup: Arc<BackupManager>,
    ledger: Arc<SharedLedger>,
    events: Arc<EventHub>,
}

impl WorkerService {
    pub fn new(
        queue: Arc<dyn JobQueuePort>,
        encoder: Arc<SegmentEncoder>,
        backup: Arc<BackupManager>,
        ledger: Arc<SharedLedger>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            queue,
            encoder,
            backup,
            ledger,
            events,
        }
    }

    /// Process jobs until the queue is closed. A job that was dequeued is
    /// always finished, even while the process shuts down.
    pub async fn run_worker_loop(&self, worker_id: usize) {
        info!(worker_id, "Worker started");
        loop {
            match self.queue.dequeue_job(DEQUEUE_TIMEOUT).await {
                Ok(Some(job)) => {
                    if let Err(e) = self.process_job(&job, worker_id).await {
                        error!(worker_id, job_id = job.id(), error = %e, "Job bookkeeping failed");
                    }
                }
                Ok(None) => continue,
                Err(QueueError::Closed) => break,
            }
        }
        info!(worker_id, "Worker stopped");
    }

    async fn process_job(&self, job: &Job, worker_id: usize) -> Result<(), StoreError> {
        match job {
            Job::Encode(seg) => self.process_segment(seg, worker_id).await,
            Job::Preview(preview) => {
                self.process_preview(preview, worker_id).await;
                Ok(())
            }
            Job::Backup(batch) => {
                info!(worker_id, job_id = %batch.id, "Running backup batch");
                self.backup.run_batch(batch).await.map(|_| ())
            }
        }
    }

    async fn process_segment(&self, job: &SegmentJob, worker_id: usize) -> Result<(), StoreError> {
        info!(worker_id, segment = job.span.index, start = job.span.start, "Processing segment");

        let appended = match self.encoder.encode_clip(job).await {
            Ok(clip) => {
                // Segments dispatched earlier go into the master video first.
                self.ledger
                    .wait_for_append_turn(&job.span, &job.series)
                    .await;
                self.encoder.append_clip(&clip).await
            }
            Err(e) => Err(e),
        };

        match appended {
            Ok(master) => {
                let in_order = self
                    .ledger
                    .update(|l| l.record_append(&job.span, &job.series))
                    .await?;
                if !in_order {
                    warn!(segment = job.span.index, start = job.span.start, series = %job.series, "Segment appended after later segments");
                }
                self.events.publish(PipelineEvent::SegmentAppended {
                    span: job.span,
                    master,
                });
            }
            Err(e) => {
                let attempts = self
                    .ledger
                    .update(|l| l.defer_segment(job.span, &job.series, true))
                    .await?;
                if attempts >= MAX_ENCODE_ATTEMPTS {
                    error!(segment = job.span.index, attempts, error = %e, "Giving up on segment");
                    self.ledger
                        .update(|l| l.resolve_segment(&job.span, &job.series))
                        .await?;
                } else {
                    warn!(segment = job.span.index, attempts, error = %e, "Segment encode failed, will retry");
                }
                self.events.publish(PipelineEvent::SegmentFailed {
                    span: job.span,
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn process_preview(&self, job: &PreviewJob, worker_id: usize) {
        info!(worker_id, segment = job.span.index, "Rendering preview");
        let event = match self.encoder.render_preview(job).await {
            Ok(output) => PipelineEvent::PreviewRendered {
                span: job.span,
                output,
            },
            Err(e) => PipelineEvent::PreviewFailed {
                span: job.span,
                reason: e.to_string(),
            },
        };
        self.events.publish(event);
    }
}

/// Record encode jobs that never started so the next run picks them up.
pub async fn defer_unstarted(ledger: &SharedLedger, jobs: Vec<Job>) -> Result<usize, StoreError> {
    let segments: Vec<SegmentJob> = jobs
        .into_iter()
        .filter_map(|job| match job {
            Job::Encode(seg) => Some(seg),
            _ => None,
        })
        .collect();
    let count = segments.len();
    if count > 0 {
        ledger
            .update(|l| {
                for seg in &segments {
                    l.defer_segment(seg.span, &seg.series, false);
                }
            })
            .await?;
        info!(count, "Deferred unstarted segment encodes");
    }
    Ok(count)
}
