use super::naming::SegmentSpan;
use super::settings::{BackupTarget, VideoSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Turn a completed segment into a clip and append it to the master video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentJob {
    pub id: String,
    pub span: SegmentSpan,
    /// Directory holding the segment's images.
    pub image_dir: PathBuf,
    pub series: String,
    pub video: VideoSettings,
}

/// Render an animated preview of a completed segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewJob {
    pub id: String,
    pub span: SegmentSpan,
    pub image_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Offload everything currently queued in the ledger's backup list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: String,
    pub target: BackupTarget,
    /// Queue uploaded images for local deletion.
    pub cleanup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Job {
    Encode(SegmentJob),
    Preview(PreviewJob),
    Backup(BackupJob),
}

impl Job {
    pub fn id(&self) -> &str {
        match self {
            Job::Encode(job) => &job.id,
            Job::Preview(job) => &job.id,
            Job::Backup(job) => &job.id,
        }
    }
}

/// Outcome reported by the background workers.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ImageCaptured {
        index: u64,
        path: PathBuf,
    },
    SegmentDispatched {
        span: SegmentSpan,
    },
    SegmentAppended {
        span: SegmentSpan,
        master: PathBuf,
    },
    SegmentFailed {
        span: SegmentSpan,
        reason: String,
    },
    PreviewRendered {
        span: SegmentSpan,
        output: PathBuf,
    },
    PreviewFailed {
        span: SegmentSpan,
        reason: String,
    },
    BackupFinished {
        uploaded: usize,
        remaining: usize,
    },
    ImagesDeleted {
        count: usize,
    },
}
