use super::atomic::write_atomic;
use crate::domain::ledger::{PendingWorkLedger, LEDGER_VERSION};
use crate::error::StoreError;
use crate::ports::ledger::LedgerStore;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tracing::warn;

/// Pending-work ledger kept as one JSON document, replaced atomically on save.
pub struct JsonLedgerFile {
    path: PathBuf,
}

impl JsonLedgerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LedgerStore for JsonLedgerFile {
    async fn load(&self) -> Result<PendingWorkLedger, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(PendingWorkLedger::default())
            }
            Err(e) => return Err(e.into()),
        };
        let mut ledger: PendingWorkLedger = serde_json::from_slice(&bytes)?;
        if ledger.version != LEDGER_VERSION {
            warn!(
                version = ledger.version,
                expected = LEDGER_VERSION,
                "Ledger written by another version, upgrading"
            );
            ledger.version = LEDGER_VERSION;
        }
        Ok(ledger)
    }

    async fn save(&self, ledger: &PendingWorkLedger) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(ledger)?;
        write_atomic(&self.path, &bytes).await?;
        Ok(())
    }
}
