//! Error types for each boundary of the capture pipeline.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised by the camera capability.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The camera did not finish the exposure in time. Retry the same index.
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    /// The camera driver reported a failure.
    #[error("camera error: {0}")]
    Device(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Whether the capture should be retried for the same image index.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Timeout(_) | CaptureError::Device(_))
    }
}

/// Errors raised while turning a segment into a clip and appending it.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("image {index} of segment missing at {path}")]
    MissingImage { index: u64, path: PathBuf },

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("concatenated video is {actual:.2}s, expected {expected:.2}s")]
    Verification { expected: f64, actual: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the remote backup store.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The local file is gone; there is nothing left to back up.
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// The remote could not be reached. Keep the file queued and stop the batch.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The remote answered but refused the file.
    #[error("upload rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the persistent state and ledger stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(String),

    /// Compare-and-set on a counter saw a different value than expected.
    #[error("{key} is {actual}, expected {expected}")]
    Conflict {
        key: &'static str,
        expected: u64,
        actual: u64,
    },
}

/// Errors raised while loading the typed settings snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("setting {0} is missing")]
    Missing(&'static str),

    #[error("setting {key} should be {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },

    #[error("setting {key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    #[error("image index {0} exceeds the 7-digit filename range")]
    IndexOverflow(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
}

/// Errors that end a capture run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
