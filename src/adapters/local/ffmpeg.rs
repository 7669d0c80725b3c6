//! `Encoder` backed by the ffmpeg and ffprobe command line tools.

use crate::domain::naming::concat_manifest;
use crate::error::EncodeError;
use crate::ports::encoder::{EncodeOptions, Encoder};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command as TokioCommand;
use tracing::debug;

/// Frame rate of animated previews.
const PREVIEW_FPS: u32 = 10;
/// Width of animated previews; height follows the aspect ratio.
const PREVIEW_WIDTH: u32 = 640;

#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    /// Run encodes under `nice -n <level>` so capture keeps priority.
    niceness: Option<i32>,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>, niceness: Option<i32>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            niceness,
        }
    }

    fn command(&self, program: &Path, args: Vec<OsString>) -> TokioCommand {
        let mut command = match self.niceness {
            Some(level) => {
                let mut nice = TokioCommand::new("nice");
                nice.arg("-n").arg(level.to_string()).arg(program);
                nice
            }
            None => TokioCommand::new(program),
        };
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run(&self, program: &Path, args: Vec<OsString>) -> Result<Output, EncodeError> {
        debug!(program = %program.display(), ?args, "Running");
        let output = self.command(program, args).output().await?;
        if !output.status.success() {
            return Err(EncodeError::Command {
                program: program.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

fn os(arg: impl Into<OsString>) -> OsString {
    arg.into()
}

fn encode_args(manifest: &Path, options: &EncodeOptions, output: &Path) -> Vec<OsString> {
    let mut args = vec![os("-y"), os("-loglevel"), os("error")];
    if let Some(fps) = options.frame_rate {
        args.extend([os("-r"), os(fps.to_string())]);
    }
    args.extend([
        os("-f"),
        os("concat"),
        os("-safe"),
        os("0"),
        os("-i"),
        manifest.into(),
        os("-c:v"),
        os("libx264"),
        os("-profile:v"),
        os(options.profile.as_str()),
        os("-preset"),
        os(options.preset.as_str()),
        os("-vf"),
        os("format=yuv420p"),
        output.into(),
    ]);
    args
}

fn concat_args(list: &Path, output: &Path) -> Vec<OsString> {
    vec![
        os("-y"),
        os("-loglevel"),
        os("error"),
        os("-f"),
        os("concat"),
        os("-safe"),
        os("0"),
        os("-i"),
        list.into(),
        os("-c"),
        os("copy"),
        // The output name ends in `.partial`, so the container is named explicitly.
        os("-f"),
        os("mp4"),
        output.into(),
    ]
}

fn preview_args(manifest: &Path, output: &Path) -> Vec<OsString> {
    vec![
        os("-y"),
        os("-loglevel"),
        os("error"),
        os("-f"),
        os("concat"),
        os("-safe"),
        os("0"),
        os("-i"),
        manifest.into(),
        os("-vf"),
        os(format!(
            "setpts=N/{PREVIEW_FPS}/TB,scale={PREVIEW_WIDTH}:-1:flags=lanczos"
        )),
        os("-r"),
        os(PREVIEW_FPS.to_string()),
        os("-loop"),
        os("0"),
        output.into(),
    ]
}

fn probe_args(media: &Path) -> Vec<OsString> {
    vec![
        os("-v"),
        os("error"),
        os("-show_entries"),
        os("format=duration"),
        os("-of"),
        os("default=noprint_wrappers=1:nokey=1"),
        media.into(),
    ]
}

fn parse_duration(stdout: &[u8]) -> Option<f64> {
    String::from_utf8_lossy(stdout)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode_images(
        &self,
        manifest: &Path,
        options: &EncodeOptions,
        output: &Path,
    ) -> Result<(), EncodeError> {
        self.run(&self.ffmpeg, encode_args(manifest, options, output))
            .await
            .map(|_| ())
    }

    async fn concat(&self, first: &Path, second: &Path, output: &Path) -> Result<(), EncodeError> {
        let list = output.with_extension("concat.txt");
        tokio::fs::write(&list, concat_manifest([first, second])).await?;
        let result = self.run(&self.ffmpeg, concat_args(&list, output)).await;
        let _ = tokio::fs::remove_file(&list).await;
        result.map(|_| ())
    }

    async fn render_preview(&self, manifest: &Path, output: &Path) -> Result<(), EncodeError> {
        self.run(&self.ffmpeg, preview_args(manifest, output))
            .await
            .map(|_| ())
    }

    async fn probe_duration(&self, media: &Path) -> Result<f64, EncodeError> {
        let output = self.run(&self.ffprobe, probe_args(media)).await?;
        parse_duration(&output.stdout).ok_or_else(|| EncodeError::Command {
            program: self.ffprobe.display().to_string(),
            status: output.status.to_string(),
            stderr: format!(
                "unreadable duration {:?}",
                String::from_utf8_lossy(&output.stdout).trim()
            ),
        })
    }
}
