//! Ordered track list with a cursor splitting history, current and future.
//!
//! Every mutation keeps `cursor.is_none() == tracks.is_empty()` and, when a
//! cursor exists, `cursor < tracks.len()`.

use crate::model::Track;
use crate::settings::StoredQueueState;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    tracks: Vec<Track>,
    cursor: Option<usize>,
}

impl Timeline {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tracks: Vec::new(),
            cursor: None,
        }
    }

    /// Restore from a persisted snapshot.
    #[must_use]
    pub fn from_stored(state: &StoredQueueState) -> Self {
        Self {
            tracks: state.playlist.clone(),
            cursor: state.resume_point(),
        }
    }

    #[must_use]
    pub fn to_stored(&self) -> StoredQueueState {
        StoredQueueState::capture(&self.tracks, self.cursor)
    }

    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[must_use]
    pub const fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    /// Track under the cursor
    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.cursor.and_then(|i| self.tracks.get(i))
    }

    #[must_use]
    pub fn position_of(&self, mid: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.mid == mid)
    }

    /// Move the cursor. Returns `false` (and changes nothing) for an invalid index.
    pub fn set_cursor(&mut self, index: usize) -> bool {
        if index < self.tracks.len() {
            self.cursor = Some(index);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.cursor = None;
    }

    /// Replace the whole timeline, keeping the first occurrence of each song.
    ///
    /// Returns the index of `tracks[start]` (clamped) in the new timeline, or
    /// `None` when `tracks` is empty, in which case nothing changes.
    pub fn replace(&mut self, tracks: &[Track], start: usize) -> Option<usize> {
        let target = tracks.get(start.min(tracks.len().checked_sub(1)?))?.mid.clone();
        let mut seen = HashSet::new();
        self.tracks = tracks
            .iter()
            .filter(|t| seen.insert(t.mid.clone()))
            .cloned()
            .collect();
        self.cursor = self.position_of(&target);
        self.cursor
    }

    /// Place `track` right after the cursor and move the cursor onto it.
    ///
    /// A pending copy of the same song further ahead is removed first; history is
    /// never touched. If `track` is already current the cursor stays put. On an
    /// empty timeline the track becomes the only entry.
    pub fn insert_at_cursor(&mut self, track: Track) -> usize {
        let Some(cursor) = self.cursor else {
            self.tracks = vec![track];
            self.cursor = Some(0);
            return 0;
        };

        if self.tracks[cursor].same_song(&track) {
            return cursor;
        }

        let mut idx = 0;
        self.tracks.retain(|t| {
            let keep = idx <= cursor || !t.same_song(&track);
            idx += 1;
            keep
        });
        let at = cursor + 1;
        self.tracks.insert(at, track);
        self.cursor = Some(at);
        at
    }

    /// Splice a list in right after the current track.
    ///
    /// Songs already waiting in the future queue move to their position in
    /// `tracks`; the current song is never duplicated. Returns the index that
    /// `tracks[start]` (clamped) ends up at, or `None` when `tracks` is empty.
    pub fn merge_at_cursor(&mut self, tracks: &[Track], start: usize) -> Option<usize> {
        let Some(cursor) = self.cursor else {
            return self.replace(tracks, start);
        };
        let target = tracks.get(start.min(tracks.len().checked_sub(1)?))?.mid.clone();
        let current_mid = self.tracks[cursor].mid.clone();

        let mut seen = HashSet::from([current_mid.clone()]);
        let incoming: Vec<Track> = tracks
            .iter()
            .filter(|t| seen.insert(t.mid.clone()))
            .cloned()
            .collect();

        let future: Vec<Track> = self.tracks.split_off(cursor + 1);
        let incoming_mids: HashSet<&str> = incoming.iter().map(|t| t.mid.as_str()).collect();
        let remaining_future = future
            .into_iter()
            .filter(|t| !incoming_mids.contains(t.mid.as_str()) && t.mid != current_mid);

        self.tracks.extend(incoming.iter().cloned());
        self.tracks.extend(remaining_future);

        let found = if target == current_mid {
            cursor
        } else {
            self.tracks[cursor + 1..]
                .iter()
                .position(|t| t.mid == target)
                .map_or(cursor, |offset| cursor + 1 + offset)
        };
        self.cursor = Some(found);
        Some(found)
    }

    /// Append songs not already in the timeline. Returns the indices they landed at.
    pub fn append_unique(&mut self, tracks: &[Track]) -> Vec<usize> {
        let mut seen: HashSet<String> = self.tracks.iter().map(|t| t.mid.clone()).collect();
        let mut added = Vec::new();
        for track in tracks {
            if seen.insert(track.mid.clone()) {
                added.push(self.tracks.len());
                self.tracks.push(track.clone());
            }
        }
        if self.cursor.is_none() && !self.tracks.is_empty() {
            self.cursor = Some(0);
        }
        added
    }

    /// Remove a future entry. History and the current track cannot be removed.
    pub fn remove_future(&mut self, index: usize) -> Option<Track> {
        let cursor = self.cursor?;
        if index <= cursor || index >= self.tracks.len() {
            return None;
        }
        Some(self.tracks.remove(index))
    }

    /// Index after the cursor, if any
    #[must_use]
    pub fn next_index(&self) -> Option<usize> {
        self.cursor
            .map(|c| c + 1)
            .filter(|&i| i < self.tracks.len())
    }

    /// Index before the cursor, if any
    #[must_use]
    pub fn prev_index(&self) -> Option<usize> {
        self.cursor.and_then(|c| c.checked_sub(1))
    }
}
