//! Index <-> filename mapping for images and segments.
//!
//! Every name uses a fixed 7-digit zero-padded decimal, so a plain string sort of
//! names is also a numeric sort. Indices above [`MAX_INDEX`] cannot be encoded.

use crate::error::NamingError;
use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

pub const INDEX_DIGITS: usize = 7;
pub const MAX_INDEX: u64 = 9_999_999;

const IMAGE_PREFIX: &str = "img";
const IMAGE_EXTENSION: &str = "jpg";
const SEGMENT_PREFIX: &str = "seg";
const SERIES_PREFIX: &str = "series-";

fn image_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^img(\d{7})\.jpg$").expect("static regex"))
}

fn segment_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^seg(\d{7})$").expect("static regex"))
}

fn check_range(index: u64) -> Result<u64, NamingError> {
    if index > MAX_INDEX {
        return Err(NamingError::IndexOverflow(index));
    }
    Ok(index)
}

/// `img0000042.jpg`
pub fn image_file_name(index: u64) -> Result<String, NamingError> {
    let index = check_range(index)?;
    Ok(format!(
        "{IMAGE_PREFIX}{index:0width$}.{IMAGE_EXTENSION}",
        width = INDEX_DIGITS
    ))
}

/// `seg0000003`
pub fn segment_name(segment: u64) -> Result<String, NamingError> {
    let segment = check_range(segment)?;
    Ok(format!("{SEGMENT_PREFIX}{segment:0width$}", width = INDEX_DIGITS))
}

pub fn parse_image_file_name(name: &str) -> Option<u64> {
    image_name_re()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn parse_segment_name(name: &str) -> Option<u64> {
    segment_name_re()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Image index of an image path, whatever directory it sits in.
pub fn parse_image_path(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(parse_image_file_name)
}

/// `series-2024-05-01_06-30-00`
pub fn series_name(started: DateTime<Local>) -> String {
    format!("{SERIES_PREFIX}{}", started.format("%Y-%m-%d_%H-%M-%S"))
}

/// A contiguous run of image indices handed to the encoder as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpan {
    pub index: u64,
    pub start: u64,
    pub len: u64,
}

impl SegmentSpan {
    /// The segment owning `image_index` when segments hold `segment_size` images.
    pub fn containing(image_index: u64, segment_size: u64) -> Self {
        let size = segment_size.max(1);
        let index = image_index / size;
        Self {
            index,
            start: index * size,
            len: size,
        }
    }

    /// One past the last image index of the span.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn contains(&self, image_index: u64) -> bool {
        image_index >= self.start && image_index < self.end()
    }

    /// Drop the images before `floor` from the front of the span.
    pub fn clipped_to(self, floor: u64) -> Self {
        if floor <= self.start {
            return self;
        }
        let start = floor.min(self.end());
        Self {
            start,
            len: self.end() - start,
            ..self
        }
    }

    /// Cut the span short at `end` (exclusive). Used for segments that stop early.
    pub fn truncated_to(self, end: u64) -> Self {
        let end = end.clamp(self.start, self.end());
        Self {
            len: end - self.start,
            ..self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn images(&self) -> std::ops::Range<u64> {
        self.start..self.end()
    }
}

/// Where the images of one capture series live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    root: PathBuf,
    series: String,
}

impl ImageLayout {
    pub fn new(root: impl Into<PathBuf>, series: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            series: series.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn series(&self) -> &str {
        &self.series
    }

    pub fn series_dir(&self) -> PathBuf {
        self.root.join(&self.series)
    }

    pub fn segment_dir(&self, segment: u64) -> Result<PathBuf, NamingError> {
        Ok(self.series_dir().join(segment_name(segment)?))
    }

    pub fn image_path(&self, segment: u64, image_index: u64) -> Result<PathBuf, NamingError> {
        Ok(self
            .segment_dir(segment)?
            .join(image_file_name(image_index)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    Ascending,
    Descending,
}

/// Every image under `root`, at any depth, sorted by file name.
///
/// Names are fixed-width, so the file-name sort is the index sort across series.
pub fn list_images(root: &Path, order: ListOrder) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| parse_image_file_name(name).is_some())
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();

    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    if order == ListOrder::Descending {
        images.reverse();
    }
    images
}

/// Line-per-file list understood by ffmpeg's concat demuxer.
pub fn concat_manifest<I, P>(paths: I) -> String
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    paths
        .into_iter()
        .map(|path| {
            let escaped = path.as_ref().to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}
