use crate::domain::ledger::PendingWorkLedger;
use crate::domain::naming::SegmentSpan;
use crate::error::StoreError;
use crate::ports::ledger::LedgerStore;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// The pending-work ledger shared by the capture loop and the workers.
///
/// Every mutation runs under one lock and is persisted before the lock is
/// released, so the stored ledger never lags behind what a task has observed.
pub struct SharedLedger {
    ledger: Mutex<PendingWorkLedger>,
    store: Arc<dyn LedgerStore>,
    changed: Notify,
}

impl SharedLedger {
    /// Load the stored ledger. Segments that were queued when the process
    /// stopped are idle again.
    pub async fn load(store: Arc<dyn LedgerStore>) -> Result<Self, StoreError> {
        let mut ledger = store.load().await?;
        ledger.requeue_all();
        Ok(Self {
            ledger: Mutex::new(ledger),
            store,
            changed: Notify::new(),
        })
    }

    pub async fn update<T>(
        &self,
        change: impl FnOnce(&mut PendingWorkLedger) -> T,
    ) -> Result<T, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let result = change(&mut ledger);
        let saved = self.store.save(&ledger).await;
        drop(ledger);
        self.changed.notify_waiters();
        saved.map(|_| result)
    }

    /// Wait until every segment dispatched before this one has been appended,
    /// given up or deferred.
    pub async fn wait_for_append_turn(&self, span: &SegmentSpan, series: &str) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if self.ledger.lock().await.is_turn_to_append(span, series) {
                return;
            }
            changed.await;
        }
    }

    pub async fn snapshot(&self) -> PendingWorkLedger {
        self.ledger.lock().await.clone()
    }

    pub async fn persist(&self) -> Result<(), StoreError> {
        let ledger = self.ledger.lock().await;
        self.store.save(&ledger).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::MemoryLedger;
    use crate::ports::ledger::MockLedgerStore;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_load_requeues_and_update_persists() {
        let mut stored = PendingWorkLedger::default();
        stored.track_segment(SegmentSpan::containing(0, 5), "s");

        let mut store = MockLedgerStore::new();
        store.expect_load().times(1).returning(move || Ok(stored.clone()));
        store
            .expect_save()
            .times(1)
            .withf(|ledger| ledger.to_backup.len() == 1 && ledger.idle_segments().len() == 1)
            .returning(|_| Ok(()));

        let shared = SharedLedger::load(Arc::new(store)).await.unwrap();
        let len = shared
            .update(|l| {
                l.enqueue_backup(PathBuf::from("/a/img0000000.jpg"));
                l.to_backup.len()
            })
            .await
            .unwrap();
        assert_eq!(len, 1);
    }

    #[tokio::test]
    async fn test_append_turn_waits_for_earlier_dispatch() {
        let shared = Arc::new(
            SharedLedger::load(Arc::new(MemoryLedger::default()))
                .await
                .unwrap(),
        );
        let first = SegmentSpan::containing(0, 3);
        let second = SegmentSpan::containing(3, 3);
        shared.update(|l| l.track_segment(first, "s")).await.unwrap();
        shared.update(|l| l.track_segment(second, "s")).await.unwrap();

        let waiter = {
            let shared = shared.clone();
            tokio::spawn(async move { shared.wait_for_append_turn(&second, "s").await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        shared.update(|l| l.record_append(&first, "s")).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_save_is_reported() {
        let mut store = MockLedgerStore::new();
        store
            .expect_load()
            .returning(|| Ok(PendingWorkLedger::default()));
        store
            .expect_save()
            .returning(|_| Err(StoreError::Io(std::io::Error::other("disk full"))));

        let shared = SharedLedger::load(Arc::new(store)).await.unwrap();
        assert!(shared.persist().await.is_err());
    }
}
