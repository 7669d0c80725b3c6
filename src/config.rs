//! Process configuration for the capture daemon and the backup server.
//!
//! Runtime behaviour (intervals, paths, toggles) lives in the settings store;
//! this only says where things are and which programs to run.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| String::from(default))
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn optional_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Configuration of the capture daemon.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// JSON settings document written by the admin surface
    pub settings_path: PathBuf,
    /// Counters, reinit flag, series and sessions
    pub state_path: PathBuf,
    /// Pending-work ledger
    pub ledger_path: PathBuf,
    /// When set, settings and state are kept in Redis instead of the JSON files
    pub redis_url: Option<String>,
    /// Background workers for encode, preview and backup jobs
    pub workers: usize,
    /// Sleep between checks of the capture schedule and control flags
    pub poll_period: Duration,
    pub camera_command: String,
    pub capture_timeout: Duration,
    /// sysfs brightness file of the camera LED
    pub camera_led_path: Option<PathBuf>,
    /// sysfs directories of the board LEDs
    pub board_leds: Vec<PathBuf>,
    pub tvservice: String,
    pub ffmpeg: String,
    pub ffprobe: String,
    /// `nice` level of encoder processes. `NICE=off` runs them at normal priority
    pub niceness: Option<i32>,
    /// How long in-flight jobs may run after a termination signal
    pub shutdown_grace: Duration,
}

impl CaptureConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            settings_path: PathBuf::from(var_or("TIMELAPSE_SETTINGS", "./settings.json")),
            state_path: PathBuf::from(var_or("TIMELAPSE_STATE", "./state.json")),
            ledger_path: PathBuf::from(var_or("TIMELAPSE_LEDGER", "./ledger.json")),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            workers: parsed_or("WORKERS", 2usize).max(1),
            poll_period: Duration::from_millis(parsed_or("POLL_PERIOD_MS", 200)),
            camera_command: var_or("CAMERA_COMMAND", "rpicam-still"),
            capture_timeout: Duration::from_secs(parsed_or("CAPTURE_TIMEOUT_SECS", 30)),
            camera_led_path: optional_path("CAMERA_LED_PATH"),
            board_leds: env::var("BOARD_LEDS")
                .unwrap_or_else(|_| String::from("/sys/class/leds/ACT,/sys/class/leds/PWR"))
                .split(',')
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .collect(),
            tvservice: var_or("TVSERVICE", "tvservice"),
            ffmpeg: var_or("FFMPEG", "ffmpeg"),
            ffprobe: var_or("FFPROBE", "ffprobe"),
            niceness: match env::var("NICE") {
                Ok(value) if value == "off" => None,
                Ok(value) => value.parse().ok().or(Some(2)),
                Err(_) => Some(2),
            },
            shutdown_grace: Duration::from_secs(parsed_or("SHUTDOWN_GRACE_SECS", 120)),
        }
    }
}

/// Configuration of the backup endpoint.
#[derive(Clone, Debug)]
pub struct BackupServerConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Directory uploaded images are stored under
    pub upload_dir: PathBuf,
}

impl BackupServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            addr: var_or("ADDR", "0.0.0.0"),
            port: var_or("PORT", "3000"),
            upload_dir: PathBuf::from(var_or("UPLOAD_DIR", "./backup")),
        }
    }
}
