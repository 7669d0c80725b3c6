use crate::domain::naming::SegmentSpan;
use crate::domain::session::CaptureSession;
use crate::error::StoreError;
use async_trait::async_trait;

/// Durable pipeline state: the image counter, the open segment, the reinit flag, the current series and
/// capture sessions. Survives process restarts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateRepository: Send + Sync {
    /// Index of the next image to capture.
    async fn image_index(&self) -> Result<u64, StoreError>;

    /// Advance the image counter from `expected` to `expected + 1`.
    /// Fails with `StoreError::Conflict` if the stored value is not `expected`.
    async fn advance_image_index(&self, expected: u64) -> Result<u64, StoreError>;

    /// The segment currently being filled, i.e. the next one to dispatch.
    async fn open_segment(&self) -> Result<Option<SegmentSpan>, StoreError>;

    async fn set_open_segment(&self, span: Option<SegmentSpan>) -> Result<(), StoreError>;

    async fn reinit_requested(&self) -> Result<bool, StoreError>;

    async fn set_reinit(&self, requested: bool) -> Result<(), StoreError>;

    async fn current_series(&self) -> Result<Option<String>, StoreError>;

    async fn set_current_series(&self, series: &str) -> Result<(), StoreError>;

    async fn open_session(&self) -> Result<Option<CaptureSession>, StoreError>;

    /// Replace the open session (`None` discards it).
    async fn set_open_session(&self, session: Option<CaptureSession>) -> Result<(), StoreError>;

    async fn append_closed_session(&self, session: CaptureSession) -> Result<(), StoreError>;

    async fn closed_sessions(&self) -> Result<Vec<CaptureSession>, StoreError>;
}
