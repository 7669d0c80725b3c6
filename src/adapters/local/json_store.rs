//! JSON-file backed state repository and settings store.
//!
//! The state file is owned by the capture process and replaced atomically on
//! every change. The settings file is owned by the admin surface and re-read on
//! every access so edits are picked up without a restart.

use super::atomic::write_atomic;
use crate::domain::naming::SegmentSpan;
use crate::domain::session::CaptureSession;
use crate::domain::settings::SettingValue;
use crate::error::StoreError;
use crate::ports::repository::StateRepository;
use crate::ports::settings::SettingsStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

fn seed_reinit() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    image_index: u64,
    #[serde(default)]
    open_segment: Option<SegmentSpan>,
    #[serde(default = "seed_reinit")]
    reinit: bool,
    #[serde(default)]
    series: Option<String>,
    #[serde(default)]
    open_session: Option<CaptureSession>,
    #[serde(default)]
    sessions: Vec<CaptureSession>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            image_index: 0,
            open_segment: None,
            reinit: seed_reinit(),
            series: None,
            open_session: None,
            sessions: Vec::new(),
        }
    }
}

async fn read_json<T>(path: &Path) -> Result<Option<T>, StoreError>
where
    T: for<'de> Deserialize<'de>,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub struct JsonStateFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<StateDocument, StoreError> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }

    /// Read-modify-write under the file lock.
    async fn update<T>(
        &self,
        change: impl FnOnce(&mut StateDocument) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        let result = change(&mut doc)?;
        write_atomic(&self.path, &serde_json::to_vec_pretty(&doc)?).await?;
        Ok(result)
    }

    async fn inspect<T>(&self, view: impl FnOnce(StateDocument) -> T + Send) -> Result<T, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(view(self.read().await?))
    }
}

#[async_trait]
impl StateRepository for JsonStateFile {
    async fn image_index(&self) -> Result<u64, StoreError> {
        self.inspect(|doc| doc.image_index).await
    }

    async fn advance_image_index(&self, expected: u64) -> Result<u64, StoreError> {
        self.update(|doc| {
            if doc.image_index != expected {
                return Err(StoreError::Conflict {
                    key: "image_index",
                    expected,
                    actual: doc.image_index,
                });
            }
            doc.image_index = expected + 1;
            Ok(doc.image_index)
        })
        .await
    }

    async fn open_segment(&self) -> Result<Option<SegmentSpan>, StoreError> {
        self.inspect(|doc| doc.open_segment).await
    }

    async fn set_open_segment(&self, span: Option<SegmentSpan>) -> Result<(), StoreError> {
        self.update(move |doc| {
            doc.open_segment = span;
            Ok(())
        })
        .await
    }

    async fn reinit_requested(&self) -> Result<bool, StoreError> {
        self.inspect(|doc| doc.reinit).await
    }

    async fn set_reinit(&self, requested: bool) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.reinit = requested;
            Ok(())
        })
        .await
    }

    async fn current_series(&self) -> Result<Option<String>, StoreError> {
        self.inspect(|doc| doc.series).await
    }

    async fn set_current_series(&self, series: &str) -> Result<(), StoreError> {
        let series = series.to_string();
        self.update(move |doc| {
            doc.series = Some(series);
            Ok(())
        })
        .await
    }

    async fn open_session(&self) -> Result<Option<CaptureSession>, StoreError> {
        self.inspect(|doc| doc.open_session).await
    }

    async fn set_open_session(&self, session: Option<CaptureSession>) -> Result<(), StoreError> {
        self.update(move |doc| {
            doc.open_session = session;
            Ok(())
        })
        .await
    }

    async fn append_closed_session(&self, session: CaptureSession) -> Result<(), StoreError> {
        self.update(move |doc| {
            doc.sessions.push(session);
            Ok(())
        })
        .await
    }

    async fn closed_sessions(&self) -> Result<Vec<CaptureSession>, StoreError> {
        self.inspect(|doc| doc.sessions).await
    }
}

pub struct JsonSettingsFile {
    path: PathBuf,
}

impl JsonSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsFile {
    async fn get(&self, key: &str) -> Result<Option<SettingValue>, StoreError> {
        Ok(self.all().await?.remove(key))
    }

    async fn all(&self) -> Result<HashMap<String, SettingValue>, StoreError> {
        Ok(read_json(&self.path).await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_fresh_state_requests_reinit() {
        let dir = tempdir().unwrap();
        let state = JsonStateFile::new(dir.path().join("state.json"));
        assert_eq!(state.image_index().await.unwrap(), 0);
        assert!(state.reinit_requested().await.unwrap());
        assert_eq!(state.current_series().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_image_index_compare_and_set() {
        let dir = tempdir().unwrap();
        let state = JsonStateFile::new(dir.path().join("state.json"));
        assert_eq!(state.advance_image_index(0).await.unwrap(), 1);
        assert_eq!(state.advance_image_index(1).await.unwrap(), 2);

        let err = state.advance_image_index(1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert_eq!(state.image_index().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        {
            let state = JsonStateFile::new(&path);
            state.advance_image_index(0).await.unwrap();
            state
                .set_open_segment(Some(SegmentSpan::containing(1, 4)))
                .await
                .unwrap();
            state.set_reinit(false).await.unwrap();
            state.set_current_series("series-a").await.unwrap();
            state
                .set_open_session(Some(CaptureSession::open(0, Utc::now())))
                .await
                .unwrap();
        }
        let state = JsonStateFile::new(&path);
        assert_eq!(state.image_index().await.unwrap(), 1);
        assert_eq!(
            state.open_segment().await.unwrap(),
            Some(SegmentSpan::containing(1, 4))
        );
        assert!(!state.reinit_requested().await.unwrap());
        assert_eq!(
            state.current_series().await.unwrap().as_deref(),
            Some("series-a")
        );
        assert!(state.open_session().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_settings_file_is_reread() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = JsonSettingsFile::new(&path);
        assert_eq!(settings.get("capture_enable").await.unwrap(), None);

        tokio::fs::write(&path, r#"{"capture_enable": true, "capture_interval": 2}"#)
            .await
            .unwrap();
        assert_eq!(
            settings.get("capture_enable").await.unwrap(),
            Some(SettingValue::Bool(true))
        );

        tokio::fs::write(&path, r#"{"capture_enable": false}"#)
            .await
            .unwrap();
        assert_eq!(
            settings.get("capture_enable").await.unwrap(),
            Some(SettingValue::Bool(false))
        );
    }
}
