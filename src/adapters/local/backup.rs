//! `BackupStorage` for the two supported targets: the multipart upload endpoint
//! served by the `backup_server` binary, and a mounted directory.

use super::fs::FsAdapter;
use crate::domain::settings::BackupTarget;
use crate::error::TransportError;
use crate::ports::storage::BackupStorage;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct BackupAdapter {
    client: reqwest::Client,
    fs: FsAdapter,
}

impl BackupAdapter {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            fs: FsAdapter::new(),
        })
    }

    async fn post(
        &self,
        local_path: &Path,
        url: &str,
        image_path: Option<&str>,
    ) -> Result<(), TransportError> {
        let bytes = match tokio::fs::read(local_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransportError::NotFound(local_path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransportError::NotFound(local_path.to_path_buf()))?;

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/jpeg")
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        // The server reads `dir` before it streams `file`.
        let mut form = Form::new();
        if let Some(dir) = image_path {
            form = form.text("dir", dir.to_string());
        }
        let form = form.part("file", part);

        let endpoint = upload_endpoint(url);
        let response = self
            .client
            .post(&endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Connection(format!("{endpoint}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

fn upload_endpoint(url: &str) -> String {
    format!("{}/upload", url.trim_end_matches('/'))
}

#[async_trait]
impl BackupStorage for BackupAdapter {
    async fn upload(&self, local_path: &Path, target: &BackupTarget) -> Result<(), TransportError> {
        debug!(path = %local_path.display(), ?target, "Uploading");
        match target {
            BackupTarget::Http { url, image_path } => {
                self.post(local_path, url, image_path.as_deref()).await
            }
            BackupTarget::Directory { path } => {
                self.fs.copy_into(local_path, path).await.map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_upload_endpoint() {
        assert_eq!(upload_endpoint("http://nas:3000"), "http://nas:3000/upload");
        assert_eq!(upload_endpoint("http://nas:3000/"), "http://nas:3000/upload");
    }

    #[tokio::test]
    async fn test_directory_target() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("img0000004.jpg");
        tokio::fs::write(&image, b"jpeg").await.unwrap();
        let target = BackupTarget::Directory {
            path: dir.path().join("backup"),
        };

        BackupAdapter::new()
            .unwrap()
            .upload(&image, &target)
            .await
            .unwrap();
        assert!(dir.path().join("backup").join("img0000004.jpg").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_reported_before_connecting() {
        let dir = tempdir().unwrap();
        let target = BackupTarget::Http {
            url: "http://127.0.0.1:9".to_string(),
            image_path: None,
        };
        let err = BackupAdapter::new()
            .unwrap()
            .upload(&dir.path().join("img0000001.jpg"), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_connection_error() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("img0000001.jpg");
        tokio::fs::write(&image, b"jpeg").await.unwrap();
        let target = BackupTarget::Http {
            url: "http://127.0.0.1:9".to_string(),
            image_path: Some("cam".to_string()),
        };
        let err = BackupAdapter::new()
            .unwrap()
            .upload(&image, &target)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
