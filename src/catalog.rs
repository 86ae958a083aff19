//! Music catalog: the `.mp3` files available for the music turns.

use crate::track::Track;
use std::path::{Path, PathBuf};

const MUSIC_EXTENSION: &str = "mp3";

/// Enumerates tracks from a music directory, falling back to a secondary
/// directory when the first holds nothing.
#[derive(Debug, Clone)]
pub struct TrackCatalog {
    music_dir: PathBuf,
    fallback_dir: Option<PathBuf>,
}

impl TrackCatalog {
    pub fn new(music_dir: PathBuf, fallback_dir: Option<PathBuf>) -> Self {
        TrackCatalog {
            music_dir,
            fallback_dir,
        }
    }

    pub fn music_dir(&self) -> &Path {
        &self.music_dir
    }

    /// All tracks, sorted by name. A missing directory is an empty catalog.
    pub fn list_tracks(&self) -> Vec<Track> {
        let tracks = scan_dir(&self.music_dir);
        if !tracks.is_empty() {
            return tracks;
        }
        match &self.fallback_dir {
            Some(dir) => scan_dir(dir),
            None => tracks,
        }
    }

    /// Resolve a music name handed back by a consumer. Only bare `.mp3`
    /// basenames that exist in the catalog resolve.
    pub fn resolve(&self, name: &str) -> Option<Track> {
        if !crate::block::is_valid_music_name(name) {
            return None;
        }
        self.list_tracks().into_iter().find(|t| t.name == name)
    }
}

fn scan_dir(dir: &Path) -> Vec<Track> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut tracks: Vec<Track> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_music_extension(path))
        .filter_map(|path| Track::from_path(&path))
        .collect();
    tracks.sort_by(|a, b| a.name.cmp(&b.name));
    tracks
}

fn has_music_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(MUSIC_EXTENSION))
        .unwrap_or(false)
}
