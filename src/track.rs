use lofty::file::AudioFile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A music asset in the catalog. Identified by its file basename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub path: PathBuf,
}

impl Track {
    /// Build a track from a file path. Returns `None` for paths without a
    /// UTF-8 basename.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        Some(Track {
            name,
            path: path.to_path_buf(),
        })
    }

    /// Identifier used by the playback history.
    pub fn id(&self) -> &str {
        &self.name
    }

    /// Playing time read from the file's audio properties.
    pub fn duration(&self) -> Result<Duration, String> {
        let tagged_file = lofty::read_from_path(&self.path)
            .map_err(|e| format!("Failed to read '{}': {}", self.path.display(), e))?;
        Ok(tagged_file.properties().duration())
    }

    /// Format a duration as MM:SS.
    pub fn duration_display(duration: Duration) -> String {
        let secs = duration.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}
