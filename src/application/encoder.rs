//! Segment clips, the master video and animated previews.

use crate::adapters::local::atomic::{partial_path, remove_stale_partials, sync_parent};
use crate::domain::jobs::{PreviewJob, SegmentJob};
use crate::domain::naming::{concat_manifest, image_file_name, segment_name, SegmentSpan};
use crate::error::EncodeError;
use crate::ports::encoder::{EncodeOptions, Encoder};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Encodes attempted per segment before it is given up.
pub const MAX_ENCODE_ATTEMPTS: u32 = 3;

/// Allowed mismatch between the concatenated duration and the sum of its inputs.
const DURATION_TOLERANCE_SECS: f64 = 0.5;

/// A freshly encoded clip and the files it was built from.
#[derive(Debug, Clone)]
pub struct SegmentClip {
    pub clip: PathBuf,
    manifest: PathBuf,
    pub master: PathBuf,
}

pub struct SegmentEncoder {
    encoder: Arc<dyn Encoder>,
    /// Serializes every write to the master video on this device.
    master_lock: Mutex<()>,
}

/// Names of the transient files of one segment. The start index keeps them
/// unique when a segment size change reuses a segment number.
fn artifact_stem(span: &SegmentSpan) -> Result<String, EncodeError> {
    let name = segment_name(span.index).map_err(invalid_index)?;
    Ok(format!("{}-{:07}", name, span.start))
}

fn invalid_index(err: crate::error::NamingError) -> EncodeError {
    EncodeError::Io(io::Error::new(io::ErrorKind::InvalidInput, err))
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Write the ordered image list of `span` to `manifest`.
///
/// Fails on the first missing image: a segment with a gap is never encoded.
pub async fn write_manifest(
    image_dir: &Path,
    span: &SegmentSpan,
    manifest: &Path,
) -> Result<(), EncodeError> {
    let mut images = Vec::with_capacity(span.len as usize);
    for index in span.images() {
        let path = image_dir.join(image_file_name(index).map_err(invalid_index)?);
        if fs::metadata(&path).await.is_err() {
            return Err(EncodeError::MissingImage { index, path });
        }
        images.push(path);
    }
    if let Some(parent) = manifest.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(manifest, concat_manifest(&images)).await?;
    Ok(())
}

impl SegmentEncoder {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        Self {
            encoder,
            master_lock: Mutex::new(()),
        }
    }

    /// Drop temp files of appends that were interrupted by a crash.
    pub async fn recover(&self, video_dir: &Path) -> io::Result<usize> {
        let _guard = self.master_lock.lock().await;
        let removed = remove_stale_partials(video_dir).await?;
        if removed > 0 {
            warn!(removed, dir = %video_dir.display(), "Removed interrupted master video appends");
        }
        Ok(removed)
    }

    /// Encode the segment's images into a clip next to the master video.
    ///
    /// Appending is a separate step so callers can put appends in segment order.
    pub async fn encode_clip(&self, job: &SegmentJob) -> Result<SegmentClip, EncodeError> {
        let stem = artifact_stem(&job.span)?;
        let manifest = job.video.dir.join(format!("{stem}.txt"));
        let clip = job.video.dir.join(format!("{stem}.mp4"));

        write_manifest(&job.image_dir, &job.span, &manifest).await?;

        let options = EncodeOptions {
            frame_rate: job.video.frame_rate,
            profile: job.video.profile.clone(),
            preset: job.video.preset.clone(),
        };
        info!(segment = job.span.index, start = job.span.start, len = job.span.len, "Encoding segment");
        self.encoder
            .encode_images(&manifest, &options, &clip)
            .await?;

        Ok(SegmentClip {
            clip,
            manifest,
            master: job.video.master_path(),
        })
    }

    /// Append an encoded clip to the master video and remove its artifacts.
    ///
    /// On failure every artifact is left in place.
    pub async fn append_clip(&self, segment: &SegmentClip) -> Result<PathBuf, EncodeError> {
        self.append(&segment.clip, &segment.master).await?;
        remove_if_present(&segment.clip).await?;
        remove_if_present(&segment.manifest).await?;
        Ok(segment.master.clone())
    }

    /// Append `clip` to `master` as one atomic replacement.
    pub async fn append(&self, clip: &Path, master: &Path) -> Result<(), EncodeError> {
        let _guard = self.master_lock.lock().await;

        if fs::metadata(master).await.is_err() {
            debug!(clip = %clip.display(), "First segment becomes the master video");
            fs::rename(clip, master).await?;
            sync_parent(master).await?;
            return Ok(());
        }

        let temp = partial_path(master);
        let result = async {
            self.encoder.concat(master, clip, &temp).await?;
            self.verify(master, clip, &temp).await?;
            fs::rename(&temp, master).await?;
            sync_parent(master).await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            let _ = remove_if_present(&temp).await;
        }
        result
    }

    async fn verify(&self, master: &Path, clip: &Path, joined: &Path) -> Result<(), EncodeError> {
        let probes = (
            self.encoder.probe_duration(master).await,
            self.encoder.probe_duration(clip).await,
            self.encoder.probe_duration(joined).await,
        );
        match probes {
            (Ok(before), Ok(added), Ok(after)) => {
                let expected = before + added;
                if (after - expected).abs() > DURATION_TOLERANCE_SECS {
                    return Err(EncodeError::Verification {
                        expected,
                        actual: after,
                    });
                }
                Ok(())
            }
            (before, added, after) => {
                let error = [before, added, after]
                    .into_iter()
                    .find_map(Result::err)
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                warn!(%error, "Could not verify master video duration");
                Ok(())
            }
        }
    }

    pub async fn render_preview(&self, job: &PreviewJob) -> Result<PathBuf, EncodeError> {
        let name = segment_name(job.span.index).map_err(invalid_index)?;
        let stem = artifact_stem(&job.span)?;
        let manifest = job.output_dir.join(format!("{stem}.txt"));
        let output = job.output_dir.join(format!("{name}.gif"));

        write_manifest(&job.image_dir, &job.span, &manifest).await?;
        let result = self.encoder.render_preview(&manifest, &output).await;
        remove_if_present(&manifest).await?;
        result.map(|_| output)
    }
}
