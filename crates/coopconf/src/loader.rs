//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, CoopConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/coopcast/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("coopcast/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("coopcast.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge `overlay` into `base`, recursing into sub-tables so a later file can
/// override a single key without restating its whole section.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table, filling gaps with compiled defaults.
pub fn from_table(table: toml::Table, origin: &Path) -> Result<CoopConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut CoopConfig, sources: &mut ConfigSources) {
    // Telemetry
    if let Ok(v) = env::var("COOPCAST_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("COOPCAST_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
    if let Ok(v) = env::var("COOPCAST_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("COOPCAST_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }

    if let Ok(v) = env::var("COOPCAST_CAPTURE_DIR") {
        config.paths.capture_dir = PathBuf::from(v);
        sources.env_overrides.push("COOPCAST_CAPTURE_DIR".to_string());
    }
    if let Ok(v) = env::var("COOPCAST_GPIO_PIN") {
        if let Ok(pin) = v.parse() {
            config.motion.gpio_pin = pin;
            sources.env_overrides.push("COOPCAST_GPIO_PIN".to_string());
        }
    }

    if let Ok(v) = env::var("COOPCAST_CONTENT_URL") {
        config.content.url = v;
        sources.env_overrides.push("COOPCAST_CONTENT_URL".to_string());
    }

    // Publishing - secrets usually arrive this way rather than in files
    if let Ok(v) = env::var("COOPCAST_MIN_INTERVAL_SECS") {
        if let Ok(secs) = v.parse() {
            config.publish.min_interval_secs = secs;
            sources.env_overrides.push("COOPCAST_MIN_INTERVAL_SECS".to_string());
        }
    }
    if let Ok(v) = env::var("COOPCAST_INSTANCE_URL") {
        config.publish.instance_url = v;
        sources.env_overrides.push("COOPCAST_INSTANCE_URL".to_string());
    }
    if let Ok(v) = env::var("COOPCAST_ACCESS_TOKEN") {
        config.publish.access_token = v;
        sources.env_overrides.push("COOPCAST_ACCESS_TOKEN".to_string());
    }

    if let Ok(v) = env::var("COOPCAST_STREAM_KEY") {
        config.broadcast.stream_key = v;
        sources.env_overrides.push("COOPCAST_STREAM_KEY".to_string());
    }
    if let Ok(v) = env::var("COOPCAST_MAX_BROADCAST_SECS") {
        if let Ok(secs) = v.parse() {
            config.broadcast.max_duration_secs = secs;
            sources.env_overrides.push("COOPCAST_MAX_BROADCAST_SECS".to_string());
        }
    }
}

/// Expand `~` and `$VAR` prefixes in every path-valued setting.
pub fn expand_paths(config: &mut CoopConfig) {
    config.paths.capture_dir = expand_path(&config.paths.capture_dir.to_string_lossy());
    config.motion.gpio_root = expand_path(&config.motion.gpio_root.to_string_lossy());

    let url = config.content.url.as_str();
    if url.starts_with('~') || url.starts_with('$') {
        config.content.url = expand_path(url).to_string_lossy().into_owned();
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
