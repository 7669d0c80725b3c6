//! Typed snapshot of the key/value settings written by the admin surface.
//!
//! The store holds loosely typed JSON values; [`Settings::from_values`] turns them
//! into one validated structure so that nothing downstream does lookups by key.
//! Inconsistent values fail here instead of silently falling back to a default.

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub mod keys {
    pub const CAPTURE_ENABLE: &str = "capture_enable";
    pub const CAPTURE_INTERVAL: &str = "capture_interval";
    pub const CAPTURE_IMAGE_PATH: &str = "capture_image_path";
    pub const CAPTURE_RESOLUTION: &str = "capture_resolution";
    pub const CAPTURE_ISO: &str = "capture_iso";
    pub const CAPTURE_SHUTTER_SPEED: &str = "capture_shutter_speed";
    pub const CAPTURE_WHITE_BALANCE: &str = "capture_white_balance";
    pub const CAPTURE_ROTATION: &str = "capture_rotation";
    pub const SEGMENT_SIZE: &str = "encoder_video_frames_per_segment";
    pub const VIDEO_CREATE: &str = "encoder_video_create";
    pub const VIDEO_PATH: &str = "encoder_video_path";
    pub const VIDEO_OUTPUT_FILENAME: &str = "encoder_video_output_filename";
    pub const VIDEO_FRAME_RATE: &str = "encoder_video_frame_rate";
    pub const VIDEO_PROFILE: &str = "encoder_video_profile";
    pub const VIDEO_PRESET: &str = "encoder_video_preset";
    pub const GIF_CREATE: &str = "encoder_gif_create";
    pub const GIF_PATH: &str = "encoder_gif_path";
    pub const BACKUP_ENABLE: &str = "backup_enable";
    pub const BACKUP_SIZE: &str = "backup_size";
    pub const BACKUP_SERVER: &str = "backup_server";
    pub const BACKUP_IMAGE_CLEANUP: &str = "backup_enable_image_cleanup";
    pub const POWER_DISABLE_HDMI: &str = "power_disable_hdmi";
    pub const POWER_DISABLE_PI_LEDS: &str = "power_disable_pi_leds";
    pub const POWER_DISABLE_CAMERA_LED: &str = "power_disable_camera_led";
}

const DEFAULT_PROFILE: &str = "baseline";
const DEFAULT_PRESET: &str = "medium";
const DEFAULT_OUTPUT_FILENAME: &str = "timelapse.mp4";
/// Longest capture interval accepted; the capture schedule is kept in `Instant`s.
pub const MAX_CAPTURE_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A single stored setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Record(Map<String, Value>),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SettingValue::Int(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Int(i) => Some(*i as f64),
            SettingValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Map<String, Value>> {
        match self {
            SettingValue::Record(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WhiteBalance {
    Auto,
    Gains { red: f32, blue: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Quarter,
    Half,
    ThreeQuarter,
}

impl Rotation {
    pub fn from_degrees(degrees: u64) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Quarter),
            180 => Some(Rotation::Half),
            270 => Some(Rotation::ThreeQuarter),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarter => 270,
        }
    }
}

/// Camera configuration applied once per capture run.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraOptions {
    pub resolution: Option<Resolution>,
    /// 0 = auto
    pub iso: u32,
    /// Microseconds, 0 = auto
    pub shutter_speed_us: u32,
    pub white_balance: WhiteBalance,
    pub rotation: Rotation,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            resolution: None,
            iso: 0,
            shutter_speed_us: 0,
            white_balance: WhiteBalance::Auto,
            rotation: Rotation::None,
        }
    }
}

/// Encoding parameters for segment clips and the master video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub dir: PathBuf,
    pub output_filename: String,
    /// `None` lets the encoder use the source-native rate.
    pub frame_rate: Option<u32>,
    pub profile: String,
    pub preset: String,
}

impl VideoSettings {
    pub fn master_path(&self) -> PathBuf {
        self.dir.join(&self.output_filename)
    }
}

/// Where raw images are offloaded to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupTarget {
    /// Multipart upload endpoint; `image_path` is the remote sub-directory.
    Http {
        url: String,
        image_path: Option<String>,
    },
    /// A mounted directory (USB stick, NFS share).
    Directory { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupSettings {
    pub target: BackupTarget,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerSettings {
    pub disable_hdmi: bool,
    pub disable_board_leds: bool,
    pub disable_camera_led: bool,
}

impl PowerSettings {
    pub fn any(&self) -> bool {
        self.disable_hdmi || self.disable_board_leds || self.disable_camera_led
    }
}

/// Validated settings snapshot. Taken at the start of each segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub capture_enabled: bool,
    pub interval: Duration,
    pub image_root: PathBuf,
    pub segment_size: u64,
    pub camera: CameraOptions,
    /// Present when segment clips and the master video are produced.
    pub video: Option<VideoSettings>,
    /// Present when animated previews are produced.
    pub preview_dir: Option<PathBuf>,
    /// Present when raw images are offloaded.
    pub backup: Option<BackupSettings>,
    pub image_cleanup: bool,
    pub power: PowerSettings,
}

impl Settings {
    pub fn from_values(values: &HashMap<String, SettingValue>) -> Result<Self, SettingsError> {
        let reader = Reader { values };

        let interval_secs = reader.required_f64(keys::CAPTURE_INTERVAL)?;
        if !interval_secs.is_finite() || interval_secs <= 0.0 {
            return Err(SettingsError::Invalid {
                key: keys::CAPTURE_INTERVAL,
                reason: format!("{interval_secs} is not a positive number of seconds"),
            });
        }
        let interval = Duration::try_from_secs_f64(interval_secs)
            .ok()
            .filter(|interval| *interval <= MAX_CAPTURE_INTERVAL)
            .ok_or_else(|| SettingsError::Invalid {
                key: keys::CAPTURE_INTERVAL,
                reason: format!(
                    "{interval_secs} seconds exceeds the maximum of {} seconds",
                    MAX_CAPTURE_INTERVAL.as_secs()
                ),
            })?;

        let segment_size = reader.required_u64(keys::SEGMENT_SIZE)?;
        if segment_size < 1 {
            return Err(SettingsError::Invalid {
                key: keys::SEGMENT_SIZE,
                reason: "a segment must hold at least one image".to_string(),
            });
        }

        let video = if reader.flag(keys::VIDEO_CREATE)? {
            Some(VideoSettings {
                dir: PathBuf::from(reader.required_str(keys::VIDEO_PATH)?),
                output_filename: reader
                    .optional_str(keys::VIDEO_OUTPUT_FILENAME)?
                    .unwrap_or(DEFAULT_OUTPUT_FILENAME)
                    .to_string(),
                frame_rate: reader
                    .optional_u64(keys::VIDEO_FRAME_RATE)?
                    .filter(|&fps| fps > 0)
                    .map(|fps| {
                        u32::try_from(fps).map_err(|_| SettingsError::Invalid {
                            key: keys::VIDEO_FRAME_RATE,
                            reason: format!("{fps} frames per second is out of range"),
                        })
                    })
                    .transpose()?,
                profile: reader
                    .optional_str(keys::VIDEO_PROFILE)?
                    .unwrap_or(DEFAULT_PROFILE)
                    .to_string(),
                preset: reader
                    .optional_str(keys::VIDEO_PRESET)?
                    .unwrap_or(DEFAULT_PRESET)
                    .to_string(),
            })
        } else {
            None
        };

        let preview_dir = if reader.flag(keys::GIF_CREATE)? {
            Some(PathBuf::from(reader.required_str(keys::GIF_PATH)?))
        } else {
            None
        };

        let backup = if reader.flag(keys::BACKUP_ENABLE)? {
            let batch_size = reader.required_u64(keys::BACKUP_SIZE)?;
            if batch_size < 1 {
                return Err(SettingsError::Invalid {
                    key: keys::BACKUP_SIZE,
                    reason: "batch size must be at least 1".to_string(),
                });
            }
            Some(BackupSettings {
                target: reader.backup_target()?,
                batch_size: usize::try_from(batch_size).map_err(|_| SettingsError::Invalid {
                    key: keys::BACKUP_SIZE,
                    reason: format!("{batch_size} images is out of range"),
                })?,
            })
        } else {
            None
        };

        Ok(Self {
            capture_enabled: reader.flag(keys::CAPTURE_ENABLE)?,
            interval,
            image_root: PathBuf::from(reader.required_str(keys::CAPTURE_IMAGE_PATH)?),
            segment_size,
            camera: reader.camera_options()?,
            video,
            preview_dir,
            backup,
            image_cleanup: reader.flag(keys::BACKUP_IMAGE_CLEANUP)?,
            power: PowerSettings {
                disable_hdmi: reader.flag(keys::POWER_DISABLE_HDMI)?,
                disable_board_leds: reader.flag(keys::POWER_DISABLE_PI_LEDS)?,
                disable_camera_led: reader.flag(keys::POWER_DISABLE_CAMERA_LED)?,
            },
        })
    }

    pub fn backup_enabled(&self) -> bool {
        self.backup.is_some()
    }

    /// Whether images must stay on disk until their whole segment is encoded.
    pub fn needs_full_segments(&self) -> bool {
        self.video.is_some() || self.preview_dir.is_some()
    }
}

struct Reader<'a> {
    values: &'a HashMap<String, SettingValue>,
}

impl<'a> Reader<'a> {
    fn get(&self, key: &'static str) -> Option<&'a SettingValue> {
        self.values.get(key)
    }

    fn flag(&self, key: &'static str) -> Result<bool, SettingsError> {
        match self.get(key) {
            None => Ok(false),
            Some(v) => v.as_bool().ok_or(SettingsError::WrongType {
                key,
                expected: "a boolean",
            }),
        }
    }

    fn optional_u64(&self, key: &'static str) -> Result<Option<u64>, SettingsError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.as_u64().map(Some).ok_or(SettingsError::WrongType {
                key,
                expected: "a non-negative integer",
            }),
        }
    }

    fn required_u64(&self, key: &'static str) -> Result<u64, SettingsError> {
        self.optional_u64(key)?.ok_or(SettingsError::Missing(key))
    }

    fn required_f64(&self, key: &'static str) -> Result<f64, SettingsError> {
        self.get(key)
            .ok_or(SettingsError::Missing(key))?
            .as_f64()
            .ok_or(SettingsError::WrongType {
                key,
                expected: "a number",
            })
    }

    fn optional_str(&self, key: &'static str) -> Result<Option<&'a str>, SettingsError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.as_str().map(Some).ok_or(SettingsError::WrongType {
                key,
                expected: "a string",
            }),
        }
    }

    fn required_str(&self, key: &'static str) -> Result<&'a str, SettingsError> {
        match self.optional_str(key)? {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(SettingsError::Missing(key)),
        }
    }

    fn optional_record(
        &self,
        key: &'static str,
    ) -> Result<Option<&'a Map<String, Value>>, SettingsError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.as_record().map(Some).ok_or(SettingsError::WrongType {
                key,
                expected: "a record",
            }),
        }
    }

    fn camera_options(&self) -> Result<CameraOptions, SettingsError> {
        let resolution = match self.optional_record(keys::CAPTURE_RESOLUTION)? {
            None => None,
            Some(record) => {
                let dimension = |field: &str| {
                    record
                        .get(field)
                        .and_then(Value::as_u64)
                        .filter(|&d| d > 0 && d <= u32::MAX as u64)
                        .map(|d| d as u32)
                        .ok_or_else(|| SettingsError::Invalid {
                            key: keys::CAPTURE_RESOLUTION,
                            reason: format!("{field} must be a positive integer"),
                        })
                };
                Some(Resolution {
                    width: dimension("width")?,
                    height: dimension("height")?,
                })
            }
        };

        let white_balance = match self.optional_record(keys::CAPTURE_WHITE_BALANCE)? {
            None => WhiteBalance::Auto,
            Some(record) => {
                let gain = |field: &str| {
                    record
                        .get(field)
                        .and_then(Value::as_f64)
                        .filter(|g| g.is_finite() && *g > 0.0)
                        .map(|g| g as f32)
                        .ok_or_else(|| SettingsError::Invalid {
                            key: keys::CAPTURE_WHITE_BALANCE,
                            reason: format!("{field} must be a positive number"),
                        })
                };
                WhiteBalance::Gains {
                    red: gain("red_gain")?,
                    blue: gain("blue_gain")?,
                }
            }
        };

        let degrees = self.optional_u64(keys::CAPTURE_ROTATION)?.unwrap_or(0);
        let rotation = Rotation::from_degrees(degrees).ok_or(SettingsError::Invalid {
            key: keys::CAPTURE_ROTATION,
            reason: format!("{degrees} is not one of 0, 90, 180, 270"),
        })?;

        let bounded = |key: &'static str| -> Result<u32, SettingsError> {
            let value = self.optional_u64(key)?.unwrap_or(0);
            u32::try_from(value).map_err(|_| SettingsError::Invalid {
                key,
                reason: format!("{value} is out of range"),
            })
        };

        Ok(CameraOptions {
            resolution,
            iso: bounded(keys::CAPTURE_ISO)?,
            shutter_speed_us: bounded(keys::CAPTURE_SHUTTER_SPEED)?,
            white_balance,
            rotation,
        })
    }

    fn backup_target(&self) -> Result<BackupTarget, SettingsError> {
        let record = self
            .optional_record(keys::BACKUP_SERVER)?
            .ok_or(SettingsError::Missing(keys::BACKUP_SERVER))?;

        if let Some(url) = record.get("url").and_then(Value::as_str) {
            return Ok(BackupTarget::Http {
                url: url.trim_end_matches('/').to_string(),
                image_path: record
                    .get("image_path")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        if let Some(path) = record.get("path").and_then(Value::as_str) {
            return Ok(BackupTarget::Directory {
                path: PathBuf::from(path),
            });
        }
        Err(SettingsError::Invalid {
            key: keys::BACKUP_SERVER,
            reason: "expected a `url` or a `path`".to_string(),
        })
    }
}
