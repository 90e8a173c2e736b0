use crate::error::{CoreError, Result};
use crate::model::PreferredQuality;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the plugin backend's callable endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Where settings are loaded from and saved to
    #[serde(default)]
    pub settings_source: SettingsSource,
}

fn default_base_url() -> String {
    "http://127.0.0.1:1337/plugins/deckmusic".into()
}

const fn default_request_timeout() -> u64 {
    10_000
}

const fn default_max_retries() -> u32 {
    3
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout(),
            max_retries: default_max_retries(),
            settings_source: SettingsSource::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SettingsSource {
    /// Settings live in the backend (`get_frontend_settings` / `save_frontend_settings`)
    #[default]
    Rpc,
    /// Settings live in a local JSON file under the config directory
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Delay before skipping a track that could not be played
    #[serde(default = "default_auto_skip_delay")]
    pub auto_skip_delay_ms: u64,
    /// Upper bound for a stream to become playable after its source is set
    #[serde(default = "default_load_timeout")]
    pub load_timeout_ms: u64,
    /// Quality used until the listener stores a preference
    #[serde(default)]
    pub default_quality: PreferredQuality,
    #[serde(default = "default_initial_volume")]
    pub initial_volume: f32,
    /// Warm the next track's stream URL and lyric after a successful start
    #[serde(default = "default_true")]
    pub prefetch_next: bool,
}

const fn default_auto_skip_delay() -> u64 {
    2_000
}

const fn default_load_timeout() -> u64 {
    15_000
}

const fn default_initial_volume() -> f32 {
    1.0
}

const fn default_true() -> bool {
    true
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            auto_skip_delay_ms: default_auto_skip_delay(),
            load_timeout_ms: default_load_timeout(),
            default_quality: PreferredQuality::default(),
            initial_volume: default_initial_volume(),
            prefetch_next: true,
        }
    }
}

impl PlaybackConfig {
    #[must_use]
    pub const fn auto_skip_delay(&self) -> Duration {
        Duration::from_millis(self.auto_skip_delay_ms)
    }

    #[must_use]
    pub const fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub stream_url_ttl_secs: u64,
    #[serde(default = "default_ttl_secs")]
    pub lyric_ttl_secs: u64,
    #[serde(default = "default_lyric_capacity")]
    pub lyric_capacity: usize,
}

const fn default_ttl_secs() -> u64 {
    30 * 60
}

const fn default_lyric_capacity() -> usize {
    200
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stream_url_ttl_secs: default_ttl_secs(),
            lyric_ttl_secs: default_ttl_secs(),
            lyric_capacity: default_lyric_capacity(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn stream_url_ttl(&self) -> Duration {
        Duration::from_secs(self.stream_url_ttl_secs)
    }

    #[must_use]
    pub const fn lyric_ttl(&self) -> Duration {
        Duration::from_secs(self.lyric_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

const fn default_debounce() -> u64 {
    400
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Also write logs to ~/.config/deckmusic/deckmusic.log
    #[serde(default)]
    pub file: bool,
}

impl Config {
    /// Get the configuration directory path (~/.config/deckmusic/)
    #[must_use]
    pub fn config_dir() -> PathBuf {
        crate::paths::config_dir()
    }

    /// Get the config file path (~/.config/deckmusic/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from file or create template on first run
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if a
    /// value is out of range.
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(&config_path, CONFIG_TEMPLATE)?;

            return Err(CoreError::ConfigNotFound { path: config_path });
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config document.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(CoreError::ConfigMissingField {
                field: "backend.base_url".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.playback.initial_volume) {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "playback.initial_volume must be between 0 and 1, got {}",
                    self.playback.initial_volume
                ),
            });
        }
        if self.cache.lyric_capacity == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "cache.lyric_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r#"# deckmusic configuration
# ~/.config/deckmusic/config.toml

[backend]
# Plugin backend endpoint; each callable is POSTed to <base_url>/<method>
base_url = "http://127.0.0.1:1337/plugins/deckmusic"
request_timeout_ms = 10000
max_retries = 3
# Where playback settings are stored: "rpc" (backend) or "file" (local settings.json)
settings_source = "rpc"

[playback]
# Delay before skipping a track with no playable source
auto_skip_delay_ms = 2000
# Give up waiting for a stream to start after this long (never auto-skips)
load_timeout_ms = 15000
# "auto", "high", "balanced" or "compat"
default_quality = "auto"
initial_volume = 1.0
prefetch_next = true

[cache]
stream_url_ttl_secs = 1800
lyric_ttl_secs = 1800
lyric_capacity = 200

[persistence]
# Coalesce settings writes that happen within this window
debounce_ms = 400

[logging]
# Also write logs to ~/.config/deckmusic/deckmusic.log
file = false
"#;
