//! Capture sessions: time ranges during which capture was continuously enabled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSession {
    pub image_start: u64,
    /// Inclusive. `None` while the session is open.
    pub image_end: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

impl CaptureSession {
    pub fn open(image_start: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            image_start,
            image_end: None,
            started_at,
            ended_at: None,
            description: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Close the session at `next_image_index`.
    ///
    /// Returns `None` when no image was captured, so empty sessions are discarded.
    pub fn close(
        self,
        next_image_index: u64,
        ended_at: DateTime<Utc>,
        description: Option<String>,
    ) -> Option<Self> {
        if next_image_index <= self.image_start {
            return None;
        }
        Some(Self {
            image_end: Some(next_image_index - 1),
            ended_at: Some(ended_at),
            description,
            ..self
        })
    }

    /// Frames captured so far. Open sessions count up to `next_image_index`.
    pub fn num_frames(&self, next_image_index: u64) -> u64 {
        match self.image_end {
            Some(end) => end + 1 - self.image_start,
            None => next_image_index.saturating_sub(self.image_start),
        }
    }

    /// Position of the session's first frame in the master video.
    pub fn offset(&self, frame_rate: u32) -> Duration {
        if frame_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.image_start as f64 / frame_rate as f64)
    }

    /// Wall-clock length. Open sessions run until `now`.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        let end = self.ended_at.unwrap_or(now);
        (end - self.started_at).to_std().unwrap_or(Duration::ZERO)
    }
}
