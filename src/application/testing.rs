//! In-memory stand-ins for the ports, shared by the service tests.

use crate::domain::ledger::PendingWorkLedger;
use crate::domain::naming::SegmentSpan;
use crate::domain::session::CaptureSession;
use crate::domain::settings::{CameraOptions, SettingValue};
use crate::error::{CaptureError, EncodeError, StoreError};
use crate::ports::camera::Camera;
use crate::ports::encoder::{EncodeOptions, Encoder};
use crate::ports::ledger::LedgerStore;
use crate::ports::repository::StateRepository;
use crate::ports::settings::SettingsStore;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Media files hold their duration in seconds as text, one second per frame.
#[derive(Default)]
pub struct FakeEncoder {
    encodes: AtomicUsize,
    fail_encode: AtomicBool,
    fail_concat: AtomicBool,
    truncate_concat: AtomicBool,
    /// Manifest name prefix and how long encoding it takes.
    slow_encodes: Mutex<Vec<(String, Duration)>>,
    /// File names of the clips appended through `concat`, in call order.
    appended: Mutex<Vec<String>>,
}

impl FakeEncoder {
    pub fn encode_calls(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    pub fn fail_encode(&self, fail: bool) {
        self.fail_encode.store(fail, Ordering::SeqCst);
    }

    pub fn fail_concat(&self, fail: bool) {
        self.fail_concat.store(fail, Ordering::SeqCst);
    }

    /// Make concat drop the second input, as a broken stream copy would.
    pub fn truncate_concat(&self, truncate: bool) {
        self.truncate_concat.store(truncate, Ordering::SeqCst);
    }

    /// Delay encodes whose manifest name starts with `prefix`.
    pub fn slow_encode(&self, prefix: &str, delay: Duration) {
        self.slow_encodes
            .lock()
            .unwrap()
            .push((prefix.to_string(), delay));
    }

    pub fn appended(&self) -> Vec<String> {
        self.appended.lock().unwrap().clone()
    }

    async fn read_duration(path: &Path) -> Result<f64, EncodeError> {
        let text = tokio::fs::read_to_string(path).await?;
        text.trim().parse().map_err(|_| EncodeError::Command {
            program: "probe".to_string(),
            status: "1".to_string(),
            stderr: format!("{} is not media", path.display()),
        })
    }
}

fn command_failure(program: &str) -> EncodeError {
    EncodeError::Command {
        program: program.to_string(),
        status: "exit status: 1".to_string(),
        stderr: "injected failure".to_string(),
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode_images(
        &self,
        manifest: &Path,
        _options: &EncodeOptions,
        output: &Path,
    ) -> Result<(), EncodeError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        if self.fail_encode.load(Ordering::SeqCst) {
            return Err(command_failure("encode"));
        }
        let name = manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let delay = self
            .slow_encodes
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let frames = tokio::fs::read_to_string(manifest).await?.lines().count();
        tokio::fs::write(output, format!("{}", frames as f64)).await?;
        Ok(())
    }

    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> Result<(), EncodeError> {
        if self.fail_concat.load(Ordering::SeqCst) {
            return Err(command_failure("concat"));
        }
        let mut total = Self::read_duration(first).await?;
        if !self.truncate_concat.load(Ordering::SeqCst) {
            total += Self::read_duration(second).await?;
        }
        tokio::fs::write(output, format!("{total}")).await?;
        if let Some(name) = second.file_name() {
            self.appended
                .lock()
                .unwrap()
                .push(name.to_string_lossy().into_owned());
        }
        Ok(())
    }

    async fn render_preview(&self, _manifest: &Path, output: &Path) -> Result<(), EncodeError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"GIF89a").await?;
        Ok(())
    }

    async fn probe_duration(&self, media: &Path) -> Result<f64, EncodeError> {
        Self::read_duration(media).await
    }
}

/// Scripted outcome of one capture call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shot {
    Ok,
    Timeout,
    Broken,
}

#[derive(Default)]
struct CameraLog {
    script: VecDeque<Shot>,
    captured: Vec<PathBuf>,
    configured: Vec<CameraOptions>,
    closed: usize,
}

/// Writes a small file per capture. Clones share the same log.
#[derive(Clone, Default)]
pub struct FakeCamera {
    log: Arc<Mutex<CameraLog>>,
}

impl FakeCamera {
    /// Outcomes to play back before captures start succeeding.
    pub fn script(&self, shots: impl IntoIterator<Item = Shot>) {
        self.log.lock().unwrap().script.extend(shots);
    }

    pub fn captured(&self) -> Vec<PathBuf> {
        self.log.lock().unwrap().captured.clone()
    }

    pub fn configured(&self) -> Vec<CameraOptions> {
        self.log.lock().unwrap().configured.clone()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }
}

#[async_trait]
impl Camera for FakeCamera {
    async fn configure(&mut self, options: &CameraOptions) -> Result<(), CaptureError> {
        self.log.lock().unwrap().configured.push(options.clone());
        Ok(())
    }

    async fn set_led(&mut self, _on: bool) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn capture(&mut self, path: &Path) -> Result<(), CaptureError> {
        let shot = self.log.lock().unwrap().script.pop_front().unwrap_or(Shot::Ok);
        match shot {
            Shot::Timeout => return Err(CaptureError::Timeout(std::time::Duration::from_secs(1))),
            Shot::Broken => {
                return Err(CaptureError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only filesystem",
                )))
            }
            Shot::Ok => {}
        }
        std::fs::write(path, b"jpeg")?;
        self.log.lock().unwrap().captured.push(path.to_path_buf());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Settings held in memory, editable while a run is in progress.
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, SettingValue>>,
}

impl MemorySettings {
    pub fn from_json(doc: serde_json::Value) -> Self {
        Self {
            values: Mutex::new(serde_json::from_value(doc).unwrap()),
        }
    }

    pub fn set(&self, key: &str, value: serde_json::Value) {
        let value = serde_json::from_value(value).unwrap();
        self.values.lock().unwrap().insert(key.to_string(), value);
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> Result<Option<SettingValue>, StoreError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn all(&self) -> Result<HashMap<String, SettingValue>, StoreError> {
        Ok(self.values.lock().unwrap().clone())
    }
}

#[derive(Debug, Default, Clone)]
pub struct StateSnapshot {
    pub image_index: u64,
    pub open_segment: Option<SegmentSpan>,
    pub reinit: bool,
    pub series: Option<String>,
    pub open_session: Option<CaptureSession>,
    pub sessions: Vec<CaptureSession>,
}

#[derive(Default)]
pub struct MemoryState {
    state: Mutex<StateSnapshot>,
}

impl MemoryState {
    pub fn with(state: StateSnapshot) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.lock().unwrap().clone()
    }

    pub fn request_reinit(&self) {
        self.state.lock().unwrap().reinit = true;
    }
}

#[async_trait]
impl StateRepository for MemoryState {
    async fn image_index(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().unwrap().image_index)
    }

    async fn advance_image_index(&self, expected: u64) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.image_index != expected {
            return Err(StoreError::Conflict {
                key: "image_index",
                expected,
                actual: state.image_index,
            });
        }
        state.image_index += 1;
        Ok(state.image_index)
    }

    async fn open_segment(&self) -> Result<Option<SegmentSpan>, StoreError> {
        Ok(self.state.lock().unwrap().open_segment)
    }

    async fn set_open_segment(&self, span: Option<SegmentSpan>) -> Result<(), StoreError> {
        self.state.lock().unwrap().open_segment = span;
        Ok(())
    }

    async fn reinit_requested(&self) -> Result<bool, StoreError> {
        Ok(self.state.lock().unwrap().reinit)
    }

    async fn set_reinit(&self, requested: bool) -> Result<(), StoreError> {
        self.state.lock().unwrap().reinit = requested;
        Ok(())
    }

    async fn current_series(&self) -> Result<Option<String>, StoreError> {
        Ok(self.state.lock().unwrap().series.clone())
    }

    async fn set_current_series(&self, series: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().series = Some(series.to_string());
        Ok(())
    }

    async fn open_session(&self) -> Result<Option<CaptureSession>, StoreError> {
        Ok(self.state.lock().unwrap().open_session.clone())
    }

    async fn set_open_session(&self, session: Option<CaptureSession>) -> Result<(), StoreError> {
        self.state.lock().unwrap().open_session = session;
        Ok(())
    }

    async fn append_closed_session(&self, session: CaptureSession) -> Result<(), StoreError> {
        self.state.lock().unwrap().sessions.push(session);
        Ok(())
    }

    async fn closed_sessions(&self) -> Result<Vec<CaptureSession>, StoreError> {
        Ok(self.state.lock().unwrap().sessions.clone())
    }
}

/// Ledger store that keeps the last saved ledger in memory.
#[derive(Default)]
pub struct MemoryLedger {
    saved: Mutex<PendingWorkLedger>,
}

impl MemoryLedger {
    pub fn with(ledger: PendingWorkLedger) -> Self {
        Self {
            saved: Mutex::new(ledger),
        }
    }

    pub fn saved(&self) -> PendingWorkLedger {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn load(&self) -> Result<PendingWorkLedger, StoreError> {
        Ok(self.saved())
    }

    async fn save(&self, ledger: &PendingWorkLedger) -> Result<(), StoreError> {
        *self.saved.lock().unwrap() = ledger.clone();
        Ok(())
    }
}
