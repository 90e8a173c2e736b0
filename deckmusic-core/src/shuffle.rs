//! Non-repeating random traversal over timeline indices.
//!
//! `history` is the order tracks were actually heard in, `cursor` points into
//! it, and `pool` holds the indices not yet visited. After every public call the
//! pool shares nothing with the history and never contains the current index.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ShuffleEngine {
    history: Vec<usize>,
    cursor: Option<usize>,
    pool: Vec<usize>,
    rng: StdRng,
}

impl Default for ShuffleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ShuffleEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic engine for reproducible traversal.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    const fn with_rng(rng: StdRng) -> Self {
        Self {
            history: Vec::new(),
            cursor: None,
            pool: Vec::new(),
            rng,
        }
    }

    #[must_use]
    pub fn history(&self) -> &[usize] {
        &self.history
    }

    #[must_use]
    pub const fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    #[must_use]
    pub fn pool(&self) -> &[usize] {
        &self.pool
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.cursor = None;
        self.pool.clear();
    }

    /// Start over from `index`; every other index becomes a candidate.
    pub fn reset_to(&mut self, index: Option<usize>, len: usize) {
        match index.filter(|&i| i < len) {
            Some(i) => {
                self.history = vec![i];
                self.cursor = Some(0);
                self.rebuild_pool(Some(i), len);
            }
            None => self.clear(),
        }
    }

    /// Bring the state back in line after the timeline changed underneath it.
    ///
    /// Out-of-range and repeated history entries are dropped. If `current` is
    /// still in the history, everything after it is discarded, which also
    /// throws away any redo path; otherwise the history restarts at `current`.
    pub fn resync(&mut self, current: Option<usize>, len: usize) {
        let Some(current) = current.filter(|&c| c < len) else {
            self.clear();
            return;
        };

        let mut seen = HashSet::new();
        self.history.retain(|&i| i < len && seen.insert(i));

        match self.history.iter().position(|&i| i == current) {
            Some(pos) => {
                self.history.truncate(pos + 1);
                self.cursor = Some(pos);
            }
            None => {
                self.history = vec![current];
                self.cursor = Some(0);
            }
        }
        self.rebuild_pool(Some(current), len);
    }

    /// Resolve the next index.
    ///
    /// Walks forward through already-visited history first, then draws from the
    /// pool. Once every track has been heard it resolves to `current` and the
    /// history is kept, so `prev` still walks back through it.
    pub fn next(&mut self, current: Option<usize>, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let current = current.filter(|&c| c < len).unwrap_or(0);

        let cursor = match self.cursor {
            Some(c) if c < self.history.len() => c,
            _ => {
                self.reset_to(Some(current), len);
                0
            }
        };

        if cursor + 1 < self.history.len() {
            self.cursor = Some(cursor + 1);
            return Some(self.history[cursor + 1]);
        }

        if self.pool.is_empty() {
            self.rebuild_pool(Some(current), len);
        }
        if self.pool.is_empty() {
            return Some(current);
        }

        let slot = self.rng.gen_range(0..self.pool.len());
        let picked = self.pool.swap_remove(slot);
        self.history.push(picked);
        self.cursor = Some(self.history.len() - 1);
        Some(picked)
    }

    /// Resolve the previous index, retracing the order tracks were heard in.
    pub fn prev(&mut self, current: Option<usize>) -> Option<usize> {
        match self.cursor {
            Some(c) if c > 0 && c < self.history.len() => {
                self.cursor = Some(c - 1);
                Some(self.history[c - 1])
            }
            _ => self.history.first().copied().or(current),
        }
    }

    /// Make freshly appended indices shuffle candidates.
    pub fn on_add(&mut self, new_indices: &[usize], current: Option<usize>) {
        for &idx in new_indices {
            if Some(idx) != current && !self.history.contains(&idx) && !self.pool.contains(&idx) {
                self.pool.push(idx);
            }
        }
    }

    /// Forget a removed timeline index and shift everything after it down.
    pub fn on_remove(&mut self, removed: usize) {
        let shift = |list: &mut Vec<usize>| {
            list.retain(|&i| i != removed);
            for i in list.iter_mut() {
                if *i > removed {
                    *i -= 1;
                }
            }
        };
        let before_cursor = match (self.cursor, self.history.iter().position(|&i| i == removed)) {
            (Some(c), Some(pos)) => pos < c,
            _ => false,
        };
        shift(&mut self.history);
        shift(&mut self.pool);
        let cursor = self.cursor.unwrap_or(0);
        let cursor = if before_cursor { cursor - 1 } else { cursor };
        self.cursor = match self.history.len() {
            0 => None,
            n => Some(cursor.min(n - 1)),
        };
    }

    /// Record a manual jump to `index`.
    ///
    /// Jumping back to a visited track rewinds the history to it; jumping to a
    /// new track drops any redo path and appends it.
    pub fn jump_to(&mut self, index: usize, len: usize) {
        if index >= len {
            return;
        }
        if let Some(pos) = self.history.iter().position(|&i| i == index) {
            self.history.truncate(pos + 1);
            self.cursor = Some(pos);
        } else {
            let keep = self.cursor.map_or(0, |c| (c + 1).min(self.history.len()));
            self.history.truncate(keep);
            self.history.push(index);
            self.cursor = Some(self.history.len() - 1);
        }
        self.rebuild_pool(Some(index), len);
    }

    fn rebuild_pool(&mut self, current: Option<usize>, len: usize) {
        let blocked: HashSet<usize> = self.history.iter().copied().collect();
        self.pool = (0..len)
            .filter(|i| Some(*i) != current && !blocked.contains(i))
            .collect();
    }
}
