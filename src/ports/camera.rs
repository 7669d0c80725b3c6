use crate::domain::settings::CameraOptions;
use crate::error::CaptureError;
use async_trait::async_trait;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Camera: Send {
    /// Apply options before a capture run.
    async fn configure(&mut self, options: &CameraOptions) -> Result<(), CaptureError>;

    /// Switch the camera's indicator light.
    async fn set_led(&mut self, on: bool) -> Result<(), CaptureError>;

    /// Write one still image to `path`.
    async fn capture(&mut self, path: &Path) -> Result<(), CaptureError>;

    /// Release the device at the end of a run.
    async fn close(&mut self) -> Result<(), CaptureError>;
}
