//! Redis adapter, for devices where the admin surface keeps its settings in Redis.
//!
//! `RedisPool` implements both `StateRepository` and `SettingsStore`.
//! Settings live in one hash whose values are JSON documents.

mod error;
mod pool;
mod repository;

pub use error::RedisStoreError;
pub use pool::RedisPool;

/// Redis key constants
const SETTINGS_HASH: &str = "timelapse:settings";
const IMAGE_INDEX_KEY: &str = "timelapse:state:image_index";
const OPEN_SEGMENT_KEY: &str = "timelapse:state:open_segment";
const REINIT_KEY: &str = "timelapse:state:reinit";
const SERIES_KEY: &str = "timelapse:state:series";
const OPEN_SESSION_KEY: &str = "timelapse:state:open_session";
const SESSIONS_KEY: &str = "timelapse:state:sessions";
