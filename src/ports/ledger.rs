use crate::domain::ledger::PendingWorkLedger;
use crate::error::StoreError;
use async_trait::async_trait;

/// Durable home of the pending-work ledger. Independent of the state repository.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// The stored ledger, or an empty one if nothing was stored yet.
    async fn load(&self) -> Result<PendingWorkLedger, StoreError>;

    /// Replace the stored ledger as one unit.
    async fn save(&self, ledger: &PendingWorkLedger) -> Result<(), StoreError>;
}
