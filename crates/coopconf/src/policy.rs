//! Publishing policy - intervals, content, broadcast schedule, sink credentials.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote collection of facts and quotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    #[serde(default = "ContentConfig::default_enabled")]
    pub enabled: bool,

    /// http(s) URL or local path of the YAML collection.
    #[serde(default)]
    pub url: String,

    /// Word used in captions, e.g. "Chicken fact 3: ...".
    #[serde(default = "ContentConfig::default_subject")]
    pub subject: String,

    #[serde(default = "ContentConfig::default_refresh_period_secs")]
    pub refresh_period_secs: u64,

    /// Consecutive failed refreshes before a degradation warning.
    #[serde(default = "ContentConfig::default_stale_after_periods")]
    pub stale_after_periods: u32,
}

impl ContentConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_subject() -> String {
        "Chicken".to_string()
    }

    fn default_refresh_period_secs() -> u64 {
        60 * 60
    }

    fn default_stale_after_periods() -> u32 {
        3
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_secs)
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            url: String::new(),
            subject: Self::default_subject(),
            refresh_period_secs: Self::default_refresh_period_secs(),
            stale_after_periods: Self::default_stale_after_periods(),
        }
    }
}

/// Social sink and rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// When false, posts are logged instead of sent.
    #[serde(default = "PublishConfig::default_enabled")]
    pub enabled: bool,

    /// Minimum seconds between granted publishes. Default: one hour.
    #[serde(default = "PublishConfig::default_min_interval_secs")]
    pub min_interval_secs: u64,

    /// Mastodon-compatible instance, e.g. "https://mastodon.social".
    #[serde(default)]
    pub instance_url: String,

    #[serde(default)]
    pub access_token: String,

    /// Caption used when no content has been loaded yet.
    #[serde(default = "PublishConfig::default_fallback_caption")]
    pub fallback_caption: String,
}

impl PublishConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_min_interval_secs() -> u64 {
        60 * 60
    }

    fn default_fallback_caption() -> String {
        "Someone is wandering around the coop!".to_string()
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            min_interval_secs: Self::default_min_interval_secs(),
            instance_url: String::new(),
            access_token: String::new(),
            fallback_caption: Self::default_fallback_caption(),
        }
    }
}

/// Live video broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default)]
    pub enabled: bool,

    /// RTMP ingest prefix; the stream key is appended.
    #[serde(default = "BroadcastConfig::default_ingest_url")]
    pub ingest_url: String,

    #[serde(default)]
    pub stream_key: String,

    /// Public page viewers are sent to in announcements.
    #[serde(default)]
    pub feed_url: String,

    #[serde(default = "BroadcastConfig::default_bitrate")]
    pub bitrate: u32,

    /// Hard upper bound on a single session.
    #[serde(default = "BroadcastConfig::default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// Delay between daemon start and the first broadcast.
    #[serde(default = "BroadcastConfig::default_start_delay_secs")]
    pub start_delay_secs: u64,

    /// Start another broadcast this often. Zero broadcasts once.
    #[serde(default)]
    pub repeat_every_secs: u64,
}

impl BroadcastConfig {
    fn default_ingest_url() -> String {
        "rtmp://a.rtmp.youtube.com/live2/".to_string()
    }

    fn default_bitrate() -> u32 {
        2_000_000
    }

    fn default_max_duration_secs() -> u64 {
        60 * 60
    }

    fn default_start_delay_secs() -> u64 {
        30
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }

    pub fn repeat_every(&self) -> Option<Duration> {
        (self.repeat_every_secs > 0).then(|| Duration::from_secs(self.repeat_every_secs))
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ingest_url: Self::default_ingest_url(),
            stream_key: String::new(),
            feed_url: String::new(),
            bitrate: Self::default_bitrate(),
            max_duration_secs: Self::default_max_duration_secs(),
            start_delay_secs: Self::default_start_delay_secs(),
            repeat_every_secs: 0,
        }
    }
}
