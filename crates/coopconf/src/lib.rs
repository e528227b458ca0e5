//! Minimal configuration loading for coopcast.
//!
//! Two groups of settings live here:
//!
//! - **Hardware** (`TelemetryConfig`, `PathsConfig`, `CameraConfig`, `MotionConfig`):
//!   what is plugged in and where things go on disk.
//! - **Policy** (`ContentConfig`, `PublishConfig`, `BroadcastConfig`): how often to
//!   post, what to post, and when to go live.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/coopcast/config.toml` (system)
//! 2. `~/.config/coopcast/config.toml` (user)
//! 3. `./coopcast.toml` (local override, replaced by `--config` when given)
//! 4. Environment variables (`COOPCAST_*`)
//!
//! # Example Config
//!
//! ```toml
//! [publish]
//! min_interval_secs = 3600
//! instance_url = "https://mastodon.social"
//! access_token = "..."
//!
//! [content]
//! url = "https://example.org/chicken-facts.yaml"
//!
//! [motion]
//! gpio_pin = 4
//!
//! [broadcast]
//! enabled = true
//! stream_key = "abcd-efgh"
//! feed_url = "https://youtube.com/@coop/live"
//! max_duration_secs = 1800
//! ```

pub mod hardware;
pub mod loader;
pub mod policy;

pub use hardware::{CameraConfig, MotionConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use policy::{BroadcastConfig, ContentConfig, PublishConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to render config: {0}")]
    Render(String),
}

/// Complete coopcast configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoopConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub motion: MotionConfig,

    #[serde(default)]
    pub content: ContentConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

impl CoopConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file replacing `./coopcast.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    ///
    /// Unlike the standard locations, an explicit `config_path` must exist.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::FileRead {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                });
            }
        }

        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();
        let mut last_path = PathBuf::from("<defaults>");

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            last_path = path.clone();
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, &last_path)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        loader::expand_paths(&mut config);

        Ok((config, sources))
    }

    /// Reject combinations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.publish.enabled {
            if self.publish.instance_url.trim().is_empty() {
                return Err(invalid("publish.instance_url", "required when publishing is enabled"));
            }
            if self.publish.access_token.trim().is_empty() {
                return Err(invalid("publish.access_token", "required when publishing is enabled"));
            }
        }

        if self.content.enabled {
            if self.content.url.trim().is_empty() {
                return Err(invalid("content.url", "required when content is enabled"));
            }
            if self.content.refresh_period_secs == 0 {
                return Err(invalid("content.refresh_period_secs", "must be greater than zero"));
            }
        }

        if self.motion.enabled && !self.camera.enabled {
            return Err(invalid("motion.enabled", "motion capture needs [camera] enabled"));
        }

        if self.broadcast.enabled {
            if !self.camera.enabled {
                return Err(invalid("broadcast.enabled", "broadcasting needs [camera] enabled"));
            }
            if self.broadcast.max_duration_secs == 0 {
                return Err(invalid("broadcast.max_duration_secs", "must be greater than zero"));
            }
            if self.broadcast.stream_key.trim().is_empty() {
                return Err(invalid("broadcast.stream_key", "required when broadcasting is enabled"));
            }
            if self.broadcast.feed_url.trim().is_empty() {
                return Err(invalid("broadcast.feed_url", "required when broadcasting is enabled"));
            }
        }

        Ok(())
    }

    /// Serialize the effective config to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))?;
        Ok(format!("# coopcast configuration\n\n{}", body))
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
