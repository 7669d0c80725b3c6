use crate::error::TransportError;
use std::io;
use std::path::{Path, PathBuf};

/// Backup into a mounted directory (USB stick, NFS share).
#[derive(Clone, Copy, Debug, Default)]
pub struct FsAdapter;

impl FsAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Copy `local_path` into `dir` under its own file name.
    ///
    /// The copy lands under a temporary name first so a half-copied image is never
    /// mistaken for a backed-up one.
    pub async fn copy_into(&self, local_path: &Path, dir: &Path) -> Result<PathBuf, TransportError> {
        let name = local_path
            .file_name()
            .ok_or_else(|| TransportError::NotFound(local_path.to_path_buf()))?;

        match tokio::fs::metadata(local_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransportError::NotFound(local_path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        }

        // An unreachable mount point is a connection problem, not a local one.
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            return Err(TransportError::Connection(format!(
                "{}: {}",
                dir.display(),
                e
            )));
        }

        let destination = dir.join(name);
        let temp = dir.join(format!(".{}.copy", name.to_string_lossy()));
        if let Err(e) = tokio::fs::copy(local_path, &temp).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(match e.kind() {
                io::ErrorKind::NotFound => TransportError::NotFound(local_path.to_path_buf()),
                _ => TransportError::Connection(format!("{}: {}", destination.display(), e)),
            });
        }
        tokio::fs::rename(&temp, &destination).await?;
        Ok(destination)
    }
}
