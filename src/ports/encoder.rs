use crate::error::EncodeError;
use async_trait::async_trait;
use std::path::Path;

/// Encoding parameters for one clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    /// `None` keeps the source-native rate.
    pub frame_rate: Option<u32>,
    pub profile: String,
    pub preset: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encode the images listed in `manifest` into a video clip at `output`.
    async fn encode_images(
        &self,
        manifest: &Path,
        options: &EncodeOptions,
        output: &Path,
    ) -> Result<(), EncodeError>;

    /// Write `first` followed by `second` to `output` without re-encoding.
    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> Result<(), EncodeError>;

    /// Render the images listed in `manifest` as an animated preview.
    async fn render_preview(&self, manifest: &Path, output: &Path) -> Result<(), EncodeError>;

    /// Playback duration in seconds.
    async fn probe_duration(&self, media: &Path) -> Result<f64, EncodeError>;
}
