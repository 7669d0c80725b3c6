use crate::domain::settings::BackupTarget;
use crate::error::TransportError;
use async_trait::async_trait;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupStorage: Send + Sync {
    /// Upload a local image to the backup target, keeping its file name.
    async fn upload(&self, local_path: &Path, target: &BackupTarget)
        -> Result<(), TransportError>;
}
