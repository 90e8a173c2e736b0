//! Path constants for configuration, settings and log files.

use std::path::PathBuf;

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "deckmusic";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// The name of the local settings document used when no backend store is configured
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// The name of the log file written when file logging is enabled
pub const LOG_FILE_NAME: &str = "deckmusic.log";

/// Get the configuration directory path (~/.config/deckmusic/)
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path (~/.config/deckmusic/config.toml)
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Get the local settings path (`~/.config/deckmusic/settings.json`)
#[must_use]
pub fn settings_path() -> PathBuf {
    config_dir().join(SETTINGS_FILE_NAME)
}

/// Get the log file path (`~/.config/deckmusic/deckmusic.log`)
#[must_use]
pub fn log_file_path() -> PathBuf {
    config_dir().join(LOG_FILE_NAME)
}
