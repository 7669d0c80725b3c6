//! `Camera` backed by the `rpicam-still` command line tool.

use crate::domain::settings::{CameraOptions, WhiteBalance};
use crate::error::CaptureError;
use crate::ports::camera::Camera;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// The sensor needs this long to adopt a manual shutter speed.
const SHUTTER_SETTLE: Duration = Duration::from_secs(1);

pub struct CommandCamera {
    program: PathBuf,
    timeout: Duration,
    /// sysfs brightness file of the camera's indicator light, if it has one.
    led_path: Option<PathBuf>,
    args: Vec<OsString>,
}

impl CommandCamera {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, led_path: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout,
            led_path,
            args: Vec::new(),
        }
    }
}

fn option_args(options: &CameraOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |flag: &str, value: String| {
        args.push(flag.into());
        args.push(value.into());
    };
    if let Some(resolution) = options.resolution {
        push("--width", resolution.width.to_string());
        push("--height", resolution.height.to_string());
    }
    if options.iso > 0 {
        // ISO 100 is unity analogue gain.
        push("--gain", format!("{:.2}", options.iso as f64 / 100.0));
    }
    if options.shutter_speed_us > 0 {
        push("--shutter", options.shutter_speed_us.to_string());
    }
    if let WhiteBalance::Gains { red, blue } = options.white_balance {
        push("--awbgains", format!("{red},{blue}"));
    }
    if options.rotation.degrees() != 0 {
        push("--rotation", options.rotation.degrees().to_string());
    }
    args
}

#[async_trait]
impl Camera for CommandCamera {
    async fn configure(&mut self, options: &CameraOptions) -> Result<(), CaptureError> {
        self.args = option_args(options);
        debug!(args = ?self.args, "Camera configured");
        if options.shutter_speed_us > 0 {
            tokio::time::sleep(SHUTTER_SETTLE).await;
        }
        Ok(())
    }

    async fn set_led(&mut self, on: bool) -> Result<(), CaptureError> {
        match &self.led_path {
            Some(path) => {
                tokio::fs::write(path, if on { "1" } else { "0" }).await?;
                Ok(())
            }
            None => {
                debug!(on, "No camera LED control configured");
                Ok(())
            }
        }
    }

    async fn capture(&mut self, path: &Path) -> Result<(), CaptureError> {
        let child = Command::new(&self.program)
            .arg("--nopreview")
            .arg("--immediate")
            .args(&self.args)
            .arg("--output")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // On timeout the child is dropped, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                let _ = tokio::fs::remove_file(path).await;
                return Err(CaptureError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Device(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        if tokio::fs::metadata(path).await.is_err() {
            return Err(CaptureError::Device(format!(
                "{} reported success but wrote no image",
                self.program.display()
            )));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        self.args.clear();
        Ok(())
    }
}
