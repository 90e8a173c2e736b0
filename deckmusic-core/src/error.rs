use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Config file not found at {path}. A template has been created - please review it and restart.")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Missing required config field: {field}")]
    ConfigMissingField { field: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Backend errors
    #[error("Backend call {operation} failed: {reason}")]
    Backend {
        operation: &'static str,
        reason: String,
    },

    #[error("Backend call {operation} was rejected: {reason}")]
    BackendRejected {
        operation: &'static str,
        reason: String,
    },

    // Settings errors
    #[error("Settings store failed: {reason}")]
    SettingsStore { reason: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure of a single play attempt, as shown to the listener.
///
/// Only [`PlaybackError::NoSource`] and [`PlaybackError::Rejected`] are
/// track-specific; the other two are treated as systemic and never trigger
/// an automatic skip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// No stream URL could be resolved for the track.
    #[error("{reason}")]
    NoSource { reason: String },

    /// The audio output refused to start (autoplay policy, corrupt stream).
    #[error("Playback failed: {reason}")]
    Rejected { reason: String },

    /// Loading did not reach a playable state in time.
    #[error("Audio load timed out after {}s, the network may be slow. Skip or retry manually.", .after.as_secs())]
    LoadTimeout { after: Duration },

    /// Anything else thrown inside the play pipeline.
    #[error("Playback error: {reason}. This may be a network or service problem, please retry.")]
    Unexpected { reason: String },
}

impl PlaybackError {
    /// Default message when the backend gives no reason for a missing source.
    pub const DEFAULT_NO_SOURCE: &'static str = "This song is temporarily unavailable";

    /// Whether this failure arms the auto-skip timer.
    #[must_use]
    pub const fn auto_skip_eligible(&self) -> bool {
        matches!(self, Self::NoSource { .. } | Self::Rejected { .. })
    }

    /// Build a [`PlaybackError::NoSource`], falling back to the default message.
    #[must_use]
    pub fn no_source(reason: Option<String>) -> Self {
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| Self::DEFAULT_NO_SOURCE.to_string());
        Self::NoSource { reason }
    }
}
