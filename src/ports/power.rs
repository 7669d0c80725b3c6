use async_trait::async_trait;
use std::io;

/// Board-level power saving toggles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn set_hdmi(&self, on: bool) -> io::Result<()>;

    async fn set_board_leds(&self, on: bool) -> io::Result<()>;
}
