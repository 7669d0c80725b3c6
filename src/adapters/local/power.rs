//! `PowerControl` for Raspberry Pi class boards: `tvservice` for HDMI and the
//! sysfs LED class for the board LEDs.

use crate::ports::power::PowerControl;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

const FALLBACK_TRIGGER: &str = "mmc0";

pub struct SysfsPower {
    tvservice: PathBuf,
    /// LED class directories, e.g. `/sys/class/leds/ACT`.
    leds: Vec<PathBuf>,
    /// Trigger each LED had before it was switched off.
    saved_triggers: Mutex<HashMap<PathBuf, String>>,
}

impl SysfsPower {
    pub fn new(tvservice: impl Into<PathBuf>, leds: Vec<PathBuf>) -> Self {
        Self {
            tvservice: tvservice.into(),
            leds,
            saved_triggers: Mutex::new(HashMap::new()),
        }
    }
}

/// The active trigger is the bracketed entry: `none [mmc0] timer`.
fn active_trigger(listing: &str) -> Option<&str> {
    listing
        .split_whitespace()
        .find_map(|t| t.strip_prefix('[').and_then(|t| t.strip_suffix(']')))
}

async fn write_attr(led: &Path, attr: &str, value: &str) -> io::Result<()> {
    tokio::fs::write(led.join(attr), value).await
}

#[async_trait]
impl PowerControl for SysfsPower {
    async fn set_hdmi(&self, on: bool) -> io::Result<()> {
        let output = Command::new(&self.tvservice)
            .arg(if on { "-p" } else { "-o" })
            .output()
            .await?;
        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "{} exited with {}: {}",
                    self.tvservice.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }

    async fn set_board_leds(&self, on: bool) -> io::Result<()> {
        let mut saved = self.saved_triggers.lock().await;
        for led in &self.leds {
            if on {
                let trigger = saved
                    .remove(led)
                    .unwrap_or_else(|| FALLBACK_TRIGGER.to_string());
                write_attr(led, "trigger", &trigger).await?;
                debug!(led = %led.display(), %trigger, "Board LED restored");
            } else {
                if !saved.contains_key(led) {
                    let listing = tokio::fs::read_to_string(led.join("trigger")).await?;
                    if let Some(current) = active_trigger(&listing) {
                        saved.insert(led.clone(), current.to_string());
                    }
                }
                write_attr(led, "trigger", "none").await?;
                write_attr(led, "brightness", "0").await?;
                debug!(led = %led.display(), "Board LED off");
            }
        }
        Ok(())
    }
}
