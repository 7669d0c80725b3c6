//! In-process job queue shared by the capture loop and the worker pool.

use crate::domain::jobs::Job;
use crate::error::QueueError;
use crate::ports::queue::JobQueuePort;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
}

#[derive(Default)]
pub struct LocalQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop handing out jobs. Jobs already running are not affected.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Take every job that was enqueued but never started.
    pub fn drain(&self) -> Vec<Job> {
        self.lock().jobs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueuePort for LocalQueue {
    async fn enqueue_job(&self, job: Job) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.jobs.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue_job(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if let Some(job) = state.jobs.pop_front() {
                    return Ok(Some(job));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}
