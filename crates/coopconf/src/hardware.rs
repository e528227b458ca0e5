//! Hardware and process configuration - fixed for the lifetime of the daemon.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Logging and trace export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// EnvFilter directive, e.g. "info" or "info,coopcast=debug".
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint ("host:port"). Empty disables export.
    #[serde(default)]
    pub otlp_endpoint: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: String::new(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where still captures are written before upload.
    /// Default: ~/.cache/coopcast/captures
    #[serde(default = "PathsConfig::default_capture_dir")]
    pub capture_dir: PathBuf,
}

impl PathsConfig {
    fn default_capture_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.cache_dir().join("coopcast/captures"))
            .unwrap_or_else(|| PathBuf::from("/tmp/coopcast/captures"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            capture_dir: Self::default_capture_dir(),
        }
    }
}

/// Camera driver settings and acquire timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "CameraConfig::default_enabled")]
    pub enabled: bool,

    #[serde(default = "CameraConfig::default_width")]
    pub width: u32,

    #[serde(default = "CameraConfig::default_height")]
    pub height: u32,

    #[serde(default = "CameraConfig::default_framerate")]
    pub framerate: u32,

    /// Text burned into captured frames. Empty disables the overlay.
    #[serde(default)]
    pub annotate_text: String,

    /// Program used for still captures.
    #[serde(default = "CameraConfig::default_still_program")]
    pub still_program: String,

    /// Program producing the raw h264 stream on stdout.
    #[serde(default = "CameraConfig::default_stream_program")]
    pub stream_program: String,

    /// How long a motion capture waits for the camera before dropping the event.
    #[serde(default = "CameraConfig::default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// How long a broadcast start waits for the camera. Zero means non-blocking.
    #[serde(default)]
    pub broadcast_acquire_timeout_ms: u64,
}

impl CameraConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_width() -> u32 {
        1024
    }

    fn default_height() -> u32 {
        768
    }

    fn default_framerate() -> u32 {
        25
    }

    fn default_still_program() -> String {
        "rpicam-still".to_string()
    }

    fn default_stream_program() -> String {
        "rpicam-vid".to_string()
    }

    fn default_capture_timeout_ms() -> u64 {
        2_000
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn broadcast_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_acquire_timeout_ms)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            width: Self::default_width(),
            height: Self::default_height(),
            framerate: Self::default_framerate(),
            annotate_text: String::new(),
            still_program: Self::default_still_program(),
            stream_program: Self::default_stream_program(),
            capture_timeout_ms: Self::default_capture_timeout_ms(),
            broadcast_acquire_timeout_ms: 0,
        }
    }
}

/// PIR motion sensor wired to a GPIO pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    #[serde(default = "MotionConfig::default_enabled")]
    pub enabled: bool,

    /// BCM pin number.
    #[serde(default = "MotionConfig::default_gpio_pin")]
    pub gpio_pin: u32,

    #[serde(default = "MotionConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// sysfs GPIO root, overridable for testing on non-Pi hosts.
    #[serde(default = "MotionConfig::default_gpio_root")]
    pub gpio_root: PathBuf,
}

impl MotionConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_gpio_pin() -> u32 {
        4
    }

    fn default_poll_interval_ms() -> u64 {
        50
    }

    fn default_gpio_root() -> PathBuf {
        PathBuf::from("/sys/class/gpio")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            gpio_pin: Self::default_gpio_pin(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            gpio_root: Self::default_gpio_root(),
        }
    }
}
