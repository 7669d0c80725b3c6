//! Local adapters for a single capture device.

pub mod atomic;
pub mod backup;
pub mod camera;
pub mod events;
pub mod ffmpeg;
pub mod fs;
pub mod json_store;
pub mod ledger_file;
pub mod power;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis;

pub use backup::BackupAdapter;
pub use camera::CommandCamera;
pub use events::hub::EventHub;
pub use ffmpeg::FfmpegEncoder;
pub use json_store::{JsonSettingsFile, JsonStateFile};
pub use ledger_file::JsonLedgerFile;
pub use power::SysfsPower;
pub use queue::LocalQueue;
#[cfg(feature = "redis")]
pub use redis::RedisPool;
