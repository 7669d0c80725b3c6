//! Offloading captured images and reclaiming local disk space.

use crate::adapters::local::EventHub;
use crate::application::ledger::SharedLedger;
use crate::domain::jobs::{BackupJob, Job, PipelineEvent};
use crate::domain::retention::{plan_sweep, RetentionPolicy};
use crate::domain::settings::Settings;
use crate::error::{StoreError, TransportError};
use crate::ports::queue::JobQueuePort;
use crate::ports::storage::BackupStorage;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub uploaded: usize,
    pub remaining: usize,
}

pub struct BackupManager {
    ledger: Arc<SharedLedger>,
    storage: Arc<dyn BackupStorage>,
    queue: Arc<dyn JobQueuePort>,
    events: Arc<EventHub>,
    /// At most one backup batch is queued or running.
    in_flight: AtomicBool,
}

impl BackupManager {
    pub fn new(
        ledger: Arc<SharedLedger>,
        storage: Arc<dyn BackupStorage>,
        queue: Arc<dyn JobQueuePort>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            ledger,
            storage,
            queue,
            events,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Record a fresh capture and start a batch once enough images are waiting.
    pub async fn after_capture(&self, path: &Path, settings: &Settings) -> Result<(), StoreError> {
        let Some(backup) = &settings.backup else {
            if settings.image_cleanup {
                let path = path.to_path_buf();
                self.ledger.update(|l| l.mark_for_deletion(path)).await?;
            }
            return Ok(());
        };

        let path = path.to_path_buf();
        let waiting = self
            .ledger
            .update(|l| {
                l.enqueue_backup(path);
                l.to_backup.len()
            })
            .await?;

        if waiting < backup.batch_size {
            return Ok(());
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(waiting, "Backup batch already in flight");
            return Ok(());
        }

        let job = Job::Backup(BackupJob {
            id: Uuid::new_v4().to_string(),
            target: backup.target.clone(),
            cleanup: settings.image_cleanup,
        });
        if let Err(e) = self.queue.enqueue_job(job).await {
            self.in_flight.store(false, Ordering::SeqCst);
            warn!(error = %e, "Could not queue backup batch");
        } else {
            info!(waiting, "Backup batch queued");
        }
        Ok(())
    }

    /// Upload every image queued when the batch starts, oldest first.
    ///
    /// Refused files stay queued and the batch moves on. An unreachable target
    /// ends the batch, leaving the rest for the next one.
    pub async fn run_batch(&self, job: &BackupJob) -> Result<BatchOutcome, StoreError> {
        let result = self.upload_batch(job).await;
        self.in_flight.store(false, Ordering::SeqCst);
        let outcome = result?;
        self.events.publish(PipelineEvent::BackupFinished {
            uploaded: outcome.uploaded,
            remaining: outcome.remaining,
        });
        Ok(outcome)
    }

    async fn upload_batch(&self, job: &BackupJob) -> Result<BatchOutcome, StoreError> {
        let batch = self.ledger.snapshot().await.to_backup;
        let mut done: Vec<PathBuf> = Vec::with_capacity(batch.len());

        for path in &batch {
            match self.storage.upload(path, &job.target).await {
                Ok(()) => done.push(path.clone()),
                Err(TransportError::NotFound(_)) => {
                    warn!(path = %path.display(), "Queued image is gone, dropping it from backup");
                    done.push(path.clone());
                }
                Err(e @ TransportError::Connection(_)) => {
                    warn!(error = %e, "Backup target unreachable, ending batch");
                    break;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Upload failed, keeping image queued");
                }
            }
        }

        let cleanup = job.cleanup;
        let remaining = self
            .ledger
            .update(|l| {
                l.complete_backups(&done);
                if cleanup {
                    for path in &done {
                        l.mark_for_deletion(path.clone());
                    }
                }
                l.to_backup.len()
            })
            .await?;

        info!(uploaded = done.len(), remaining, "Backup batch finished");
        Ok(BatchOutcome {
            uploaded: done.len(),
            remaining,
        })
    }

    /// Delete local images whose work is done. Returns how many were removed.
    pub async fn sweep(&self, policy: &RetentionPolicy) -> Result<usize, StoreError> {
        let plan = plan_sweep(&self.ledger.snapshot().await, policy);
        if plan.delete.is_empty() && plan.invalid.is_empty() {
            return Ok(0);
        }

        let mut finished = plan.invalid.clone();
        for path in &plan.invalid {
            warn!(path = %path.display(), "Dropping unrecognised entry from the deletion list");
        }
        let mut removed = 0;
        for path in plan.delete {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not delete image");
                    continue;
                }
            }
            finished.push(path);
        }

        self.ledger.update(|l| l.complete_deletions(&finished)).await?;
        if removed > 0 {
            self.events.publish(PipelineEvent::ImagesDeleted { count: removed });
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::LocalQueue;
    use crate::domain::ledger::PendingWorkLedger;
    use crate::domain::naming::SegmentSpan;
    use crate::domain::settings::tests::values;
    use crate::domain::settings::BackupTarget;
    use crate::ports::ledger::MockLedgerStore;
    use crate::ports::storage::MockBackupStorage;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn shared_ledger() -> Arc<SharedLedger> {
        let mut store = MockLedgerStore::new();
        store
            .expect_load()
            .returning(|| Ok(PendingWorkLedger::default()));
        store.expect_save().returning(|_| Ok(()));
        Arc::new(SharedLedger::load(Arc::new(store)).await.unwrap())
    }

    fn settings(backup: bool, cleanup: bool) -> Settings {
        Settings::from_values(&values(json!({
            "capture_interval": 1,
            "capture_image_path": "/data",
            "encoder_video_frames_per_segment": 5,
            "backup_enable": backup,
            "backup_size": 2,
            "backup_server": {"url": "http://nas:3000"},
            "backup_enable_image_cleanup": cleanup
        })))
        .unwrap()
    }

    fn img(index: u64) -> PathBuf {
        PathBuf::from(format!("/data/s/seg0000000/img{index:07}.jpg"))
    }

    async fn manager(storage: MockBackupStorage, queue: Arc<LocalQueue>) -> BackupManager {
        BackupManager::new(
            shared_ledger().await,
            Arc::new(storage),
            queue,
            Arc::new(EventHub::new()),
        )
    }

    fn backup_job(cleanup: bool) -> BackupJob {
        BackupJob {
            id: "b".to_string(),
            target: BackupTarget::Http {
                url: "http://nas:3000".to_string(),
                image_path: None,
            },
            cleanup,
        }
    }

    #[tokio::test]
    async fn test_batch_is_queued_once_size_is_reached() {
        let queue = Arc::new(LocalQueue::new());
        let manager = manager(MockBackupStorage::new(), queue.clone()).await;
        let settings = settings(true, false);

        manager.after_capture(&img(0), &settings).await.unwrap();
        assert!(queue.is_empty());
        manager.after_capture(&img(1), &settings).await.unwrap();
        assert_eq!(queue.len(), 1);
        // A second trigger while the first batch is pending does nothing.
        manager.after_capture(&img(2), &settings).await.unwrap();
        assert_eq!(queue.len(), 1);

        let job = queue.dequeue_job(Duration::ZERO).await.unwrap();
        assert!(matches!(job, Some(Job::Backup(BackupJob { cleanup: false, .. }))));
    }

    #[tokio::test]
    async fn test_without_backup_cleanup_marks_for_deletion() {
        let queue = Arc::new(LocalQueue::new());
        let manager = manager(MockBackupStorage::new(), queue.clone()).await;
        manager
            .after_capture(&img(0), &settings(false, true))
            .await
            .unwrap();
        let ledger = manager.ledger.snapshot().await;
        assert!(ledger.to_backup.is_empty());
        assert_eq!(ledger.to_delete, vec![img(0)]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_keeps_the_rest_queued() {
        let mut storage = MockBackupStorage::new();
        storage.expect_upload().times(2).returning(|path, _| {
            if path.ends_with("img0000001.jpg") {
                Err(TransportError::Connection("refused".to_string()))
            } else {
                Ok(())
            }
        });
        let manager = manager(storage, Arc::new(LocalQueue::new())).await;
        for i in 0..3 {
            manager
                .ledger
                .update(|l| l.enqueue_backup(img(i)))
                .await
                .unwrap();
        }

        let outcome = manager.run_batch(&backup_job(true)).await.unwrap();
        assert_eq!(outcome, BatchOutcome { uploaded: 1, remaining: 2 });
        let ledger = manager.ledger.snapshot().await;
        assert_eq!(ledger.to_backup, vec![img(1), img(2)]);
        assert_eq!(ledger.to_delete, vec![img(0)]);
        assert!(!manager.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_rejected_and_missing_files() {
        let mut storage = MockBackupStorage::new();
        storage.expect_upload().times(3).returning(|path, _| {
            if path.ends_with("img0000000.jpg") {
                Err(TransportError::Rejected {
                    status: 413,
                    message: "too large".to_string(),
                })
            } else if path.ends_with("img0000001.jpg") {
                Err(TransportError::NotFound(path.to_path_buf()))
            } else {
                Ok(())
            }
        });
        let manager = manager(storage, Arc::new(LocalQueue::new())).await;
        for i in 0..3 {
            manager
                .ledger
                .update(|l| l.enqueue_backup(img(i)))
                .await
                .unwrap();
        }

        let outcome = manager.run_batch(&backup_job(false)).await.unwrap();
        assert_eq!(outcome.uploaded, 2);
        let ledger = manager.ledger.snapshot().await;
        assert_eq!(ledger.to_backup, vec![img(0)]);
        assert!(ledger.to_delete.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_old_images_only() {
        let dir = tempdir().unwrap();
        let images: Vec<PathBuf> = (0..4)
            .map(|i| dir.path().join(format!("img{i:07}.jpg")))
            .collect();
        for path in &images {
            std::fs::write(path, b"jpeg").unwrap();
        }
        let manager = manager(MockBackupStorage::new(), Arc::new(LocalQueue::new())).await;
        let mut events = manager.events.subscribe();
        manager
            .ledger
            .update(|l| {
                for path in &images {
                    l.mark_for_deletion(path.clone());
                }
                l.mark_for_deletion(dir.path().join("img9999999.jpg"));
                l.to_backup.push(images[1].clone());
                l.track_segment(SegmentSpan::containing(2, 1), "other");
            })
            .await
            .unwrap();

        let policy = RetentionPolicy {
            backup_enabled: true,
            needs_full_segments: true,
            current_image_index: 6,
            segment_size: 1,
        };
        assert_eq!(manager.sweep(&policy).await.unwrap(), 3);

        assert!(!images[0].exists());
        assert!(images[1].exists(), "awaiting backup");
        assert!(!images[2].exists(), "held only for another series");
        assert_eq!(
            events.recv().await.unwrap(),
            PipelineEvent::ImagesDeleted { count: 3 }
        );
        let ledger = manager.ledger.snapshot().await;
        assert_eq!(
            ledger.to_delete,
            vec![images[1].clone(), dir.path().join("img9999999.jpg")]
        );
    }

    #[tokio::test]
    async fn test_repeated_sweep_changes_nothing() {
        let dir = tempdir().unwrap();
        let images: Vec<PathBuf> = (0..4)
            .map(|i| dir.path().join(format!("img{i:07}.jpg")))
            .collect();
        for (i, path) in images.iter().enumerate() {
            // Image 1 is already gone from disk.
            if i != 1 {
                std::fs::write(path, b"jpeg").unwrap();
            }
        }
        let manager = manager(MockBackupStorage::new(), Arc::new(LocalQueue::new())).await;
        manager
            .ledger
            .update(|l| {
                for path in &images {
                    l.mark_for_deletion(path.clone());
                }
                l.enqueue_backup(images[3].clone());
            })
            .await
            .unwrap();

        let policy = RetentionPolicy {
            backup_enabled: true,
            needs_full_segments: true,
            current_image_index: 5,
            segment_size: 1,
        };
        assert_eq!(manager.sweep(&policy).await.unwrap(), 2);
        let after_first = manager.ledger.snapshot().await;
        assert_eq!(after_first.to_delete, vec![images[3].clone()]);
        assert_eq!(after_first.to_backup, vec![images[3].clone()]);

        assert_eq!(manager.sweep(&policy).await.unwrap(), 0);
        assert_eq!(manager.ledger.snapshot().await, after_first);
        assert!(images[3].exists());
    }
}
