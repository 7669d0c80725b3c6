use crate::domain::jobs::Job;
use crate::error::QueueError;
use async_trait::async_trait;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueuePort: Send + Sync {
    /// Enqueue a job without waiting for it to run.
    async fn enqueue_job(&self, job: Job) -> Result<(), QueueError>;

    /// Dequeue a job, waiting at most `timeout`.
    /// `Ok(None)` on timeout, `Err(QueueError::Closed)` once the queue is closed.
    async fn dequeue_job(&self, timeout: Duration) -> Result<Option<Job>, QueueError>;
}
