use crate::error::PlaybackError;
use crate::lyric::ParsedLyric;
use crate::time::DurationExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A playable song as the providers describe it.
///
/// Identity is the provider-scoped `mid`; two tracks with the same `mid` are the
/// same song even if their display metadata differs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Numeric id, kept only for round-tripping provider payloads
    #[serde(default)]
    pub id: i64,
    /// Provider-scoped unique id
    pub mid: String,
    pub name: String,
    #[serde(rename = "singer", default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_mid: Option<String>,
    /// Nominal length in whole seconds
    #[serde(default)]
    pub duration: u32,
    /// Cover image URL
    #[serde(default)]
    pub cover: String,
    /// Owning provider id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
}

impl Track {
    /// Whether two tracks refer to the same song.
    #[must_use]
    pub fn same_song(&self, other: &Self) -> bool {
        self.mid == other.mid
    }

    #[must_use]
    pub fn nominal_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration))
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.same_song(other)
    }
}

impl Eq for Track {}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.artist.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} - {}", self.artist, self.name)
        }
    }
}

/// How next/previous resolve their target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    /// Walk the timeline front to back, stopping at the end
    #[default]
    Order,
    /// Repeat the current track
    Single,
    /// Non-repeating random order with back-navigation
    Shuffle,
}

impl PlayMode {
    /// The mode that follows this one when the listener taps the mode button.
    #[must_use]
    pub const fn cycle(self) -> Self {
        match self {
            Self::Order => Self::Single,
            Self::Single => Self::Shuffle,
            Self::Shuffle => Self::Order,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Single => "single",
            Self::Shuffle => "shuffle",
        }
    }
}

impl std::str::FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "order" => Ok(Self::Order),
            "single" => Ok(Self::Single),
            "shuffle" => Ok(Self::Shuffle),
            other => Err(format!("unknown play mode: {other}")),
        }
    }
}

/// Stream quality the listener asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreferredQuality {
    /// Let the backend pick
    #[default]
    Auto,
    High,
    Balanced,
    /// Lowest bitrate, most widely playable
    Compat,
}

impl PreferredQuality {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::High => "high",
            Self::Balanced => "balanced",
            Self::Compat => "compat",
        }
    }
}

impl std::str::FromStr for PreferredQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "high" => Ok(Self::High),
            "balanced" => Ok(Self::Balanced),
            "compat" => Ok(Self::Compat),
            other => Err(format!("unknown quality: {other}")),
        }
    }
}

/// Read-only view of everything a UI surface renders.
#[derive(Debug, Clone, Default)]
pub struct PlayerSnapshot {
    /// Track the session is about (may lag `cursor` while an error is shown)
    pub current_track: Option<Track>,
    pub is_playing: bool,
    pub current_time: Duration,
    /// Known duration, `None` until the output exposes one
    pub duration: Option<Duration>,
    pub loading: bool,
    pub error: Option<PlaybackError>,
    pub lyric: Option<Arc<ParsedLyric>>,
    pub tracks: Vec<Track>,
    /// Timeline position, `None` iff `tracks` is empty
    pub cursor: Option<usize>,
    pub mode: PlayMode,
    pub volume: f32,
    pub settings_restored: bool,
    pub provider_id: Option<String>,
}

impl PlayerSnapshot {
    /// One-line progress summary, e.g. `1:05 / 3:20`.
    #[must_use]
    pub fn progress_label(&self) -> String {
        let total = self
            .duration
            .or_else(|| self.current_track.as_ref().map(Track::nominal_duration))
            .unwrap_or_default();
        format!("{} / {}", self.current_time.to_clock(), total.to_clock())
    }
}
