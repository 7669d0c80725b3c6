//! Write-to-temp-then-rename file replacement.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Sibling path used while a replacement for `path` is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4().simple()))
}

pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n.ends_with(".partial"))
        .unwrap_or(false)
}

/// Replace `path` with `contents`. Readers see either the old or the new file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp = partial_path(path);

    let result = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, path).await?;
        sync_parent(path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp).await;
    }
    result
}

/// Flush the directory entry after a rename.
#[cfg(unix)]
pub async fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::File::open(parent).await?.sync_all().await
        }
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
pub async fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Remove leftovers of interrupted replacements in `dir`. Returns how many went.
pub async fn remove_stale_partials(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_partial(&path) {
            fs::remove_file(&path).await?;
            removed += 1;
        }
    }
    Ok(removed)
}
