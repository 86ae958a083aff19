//! Music track selection with a non-repetition window.

use crate::catalog::TrackCatalog;
use crate::track::Track;
use std::collections::VecDeque;

/// Number of recent picks excluded from re-selection.
pub const HISTORY_SIZE: usize = 10;

/// Bounded FIFO of the most recently played track identifiers.
/// Eviction is by insertion order, oldest first.
#[derive(Debug, Clone)]
pub struct PlaybackHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl PlaybackHistory {
    pub fn new(capacity: usize) -> Self {
        PlaybackHistory {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a pick, evicting the oldest entry past capacity.
    pub fn push(&mut self, id: String) {
        self.entries.push_back(id);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether `id` is among the `window` most recent entries.
    pub fn recently_played(&self, id: &str, window: usize) -> bool {
        self.entries.iter().rev().take(window).any(|e| e == id)
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl Default for PlaybackHistory {
    fn default() -> Self {
        PlaybackHistory::new(HISTORY_SIZE)
    }
}

/// Picks the next music track uniformly at random among those not played
/// recently. The random source is injected so selections are reproducible.
pub struct TrackSelector {
    catalog: TrackCatalog,
    history: PlaybackHistory,
    rng: fastrand::Rng,
}

impl TrackSelector {
    pub fn new(catalog: TrackCatalog, rng: fastrand::Rng) -> Self {
        TrackSelector {
            catalog,
            history: PlaybackHistory::default(),
            rng,
        }
    }

    pub fn catalog(&self) -> &TrackCatalog {
        &self.catalog
    }

    pub fn history(&self) -> &PlaybackHistory {
        &self.history
    }

    /// Scan the catalog and pick a track. `None` when there is no music.
    pub fn select_next(&mut self) -> Option<Track> {
        let all = self.catalog.list_tracks();
        self.select_from(&all)
    }

    /// Pick from an already-scanned track list.
    ///
    /// The exclusion window is the history, bounded by `all.len() - 1` so at
    /// least one track always stays eligible. If nothing is eligible anyway
    /// (stale history after the catalog changed), the history is reset.
    pub fn select_from(&mut self, all: &[Track]) -> Option<Track> {
        if all.is_empty() {
            return None;
        }

        let window = self.history.capacity().min(all.len() - 1);
        let mut candidates: Vec<&Track> = all
            .iter()
            .filter(|t| !self.history.recently_played(t.id(), window))
            .collect();
        if candidates.is_empty() {
            self.history.clear();
            candidates = all.iter().collect();
        }

        let chosen = candidates[self.rng.usize(..candidates.len())].clone();
        self.history.push(chosen.id().to_string());
        Some(chosen)
    }
}
