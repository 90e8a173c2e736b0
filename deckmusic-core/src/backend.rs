use crate::error::CoreError;
use crate::model::{PreferredQuality, Track};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request for a playable stream URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamUrlRequest {
    pub mid: String,
    pub quality: PreferredQuality,
    /// Track name, lets fallback providers match the song
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
}

impl StreamUrlRequest {
    /// Build a request for a track, carrying its metadata for fallback matching
    #[must_use]
    pub fn for_track(track: &Track, quality: PreferredQuality) -> Self {
        Self {
            mid: track.mid.clone(),
            quality,
            name: non_empty(&track.name),
            artist: non_empty(&track.artist),
        }
    }
}

/// Backend answer to a [`StreamUrlRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUrlResponse {
    pub success: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Provider that served the song when the active one could not
    #[serde(default, alias = "fallback_provider")]
    pub fallback_provider: Option<String>,
}

/// Request for a song's lyric
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LyricRequest {
    pub mid: String,
    pub want_translation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
}

impl LyricRequest {
    #[must_use]
    pub fn for_track(track: &Track) -> Self {
        Self {
            mid: track.mid.clone(),
            want_translation: true,
            name: non_empty(&track.name),
            artist: non_empty(&track.artist),
        }
    }
}

/// Backend answer to a [`LyricRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricResponse {
    pub success: bool,
    #[serde(default)]
    pub lyric: Option<String>,
    #[serde(default, alias = "trans")]
    pub translation: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "fallback_provider")]
    pub fallback_provider: Option<String>,
}

/// The active music provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
}

/// Calls the playback core needs from the plugin backend
#[async_trait]
pub trait MusicBackend: Send + Sync {
    /// Resolve a stream URL.
    ///
    /// A song that cannot be played is a successful call with `success: false`;
    /// `Err` is reserved for transport failures.
    async fn resolve_stream_url(
        &self,
        request: &StreamUrlRequest,
    ) -> Result<StreamUrlResponse, CoreError>;

    /// Resolve a lyric and, when asked, its translation.
    async fn resolve_lyric(&self, request: &LyricRequest) -> Result<LyricResponse, CoreError>;

    /// The provider the backend is currently serving.
    async fn current_provider(&self) -> Result<Option<ProviderInfo>, CoreError>;

    /// The provider the backend remembers from the previous session.
    async fn last_provider_id(&self) -> Result<Option<String>, CoreError>;

    /// Ask the backend to serve another provider.
    async fn switch_provider(&self, provider_id: &str) -> Result<(), CoreError>;
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
