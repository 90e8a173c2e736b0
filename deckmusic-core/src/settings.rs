use crate::model::{PlayMode, PreferredQuality, Track};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Saved queue for one provider.
///
/// `current_index` keeps the wire convention of `-1` for "nothing selected".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredQueueState {
    #[serde(default)]
    pub playlist: Vec<Track>,
    #[serde(default = "no_index")]
    pub current_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_mid: Option<String>,
}

const fn no_index() -> i64 {
    -1
}

impl StoredQueueState {
    /// The explicit empty snapshot written when a queue is cleared.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            playlist: Vec::new(),
            current_index: -1,
            current_mid: None,
        }
    }

    /// Build a snapshot from a track list and cursor.
    #[must_use]
    pub fn capture(playlist: &[Track], cursor: Option<usize>) -> Self {
        let current = cursor.and_then(|i| playlist.get(i));
        Self {
            playlist: playlist.to_vec(),
            current_index: match (cursor, current) {
                (Some(i), Some(_)) => i64::try_from(i).unwrap_or(-1),
                _ => -1,
            },
            current_mid: current.map(|t| t.mid.clone()),
        }
    }

    /// Where playback resumes.
    ///
    /// A present `current_mid` wins over `current_index` when it is still in the
    /// playlist; otherwise the index is clamped to the playlist bounds.
    #[must_use]
    pub fn resume_point(&self) -> Option<usize> {
        if self.playlist.is_empty() {
            return None;
        }
        if let Some(mid) = self.current_mid.as_deref() {
            if let Some(idx) = self.playlist.iter().position(|t| t.mid == mid) {
                return Some(idx);
            }
        }
        let last = self.playlist.len() - 1;
        match usize::try_from(self.current_index) {
            Ok(idx) => Some(idx.min(last)),
            // A negative index on a non-empty playlist still resumes somewhere
            Err(_) => Some(0),
        }
    }

    /// Identity used to skip writing a snapshot that is already stored.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mids: Vec<&str> = self.playlist.iter().map(|t| t.mid.as_str()).collect();
        format!(
            "{}|{}|{}",
            self.current_index,
            self.current_mid.as_deref().unwrap_or_default(),
            mids.join(",")
        )
    }

    /// Normalize to the resume point so fingerprints compare equal after a load.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let resume = self.resume_point();
        Self::capture(&self.playlist, resume)
    }
}

/// The whole settings document mirrored to durable storage.
///
/// Unknown keys are carried through untouched so that settings written by other
/// surfaces survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendSettings {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_queues: BTreeMap<String, StoredQueueState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_mode: Option<PlayMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_quality: Option<PreferredQuality>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FrontendSettings {
    /// Stored volume, clamped, or full volume when never saved.
    #[must_use]
    pub fn volume_or_default(&self) -> f32 {
        self.volume
            .filter(|v| v.is_finite())
            .map_or(1.0, |v| v.clamp(0.0, 1.0))
    }

    #[must_use]
    pub fn play_mode_or_default(&self) -> PlayMode {
        self.play_mode.unwrap_or_default()
    }

    #[must_use]
    pub fn preferred_quality_or(&self, fallback: PreferredQuality) -> PreferredQuality {
        self.preferred_quality.unwrap_or(fallback)
    }
}
