//! Ready blocks: naming, validation, closing-message rotation.

use serde::Serialize;
use std::path::{Path, PathBuf};

const BLOCK_PREFIX: &str = "block_";
const BLOCK_EXTENSION: &str = ".mp3";
const BLOCK_ID_DIGITS: usize = 6;

/// Largest ID that fits the six-digit file name.
pub const MAX_BLOCK_ID: u64 = 999_999;

/// A finished, fully written block file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub id: u64,
    pub name: String,
    pub path: PathBuf,
}

impl Block {
    /// Block `id` inside `blocks_dir`.
    pub fn new(id: u64, blocks_dir: &Path) -> Self {
        let name = block_file_name(id);
        let path = blocks_dir.join(&name);
        Block { id, name, path }
    }
}

/// `block_000042.mp3`
pub fn block_file_name(id: u64) -> String {
    format!(
        "{}{:0width$}{}",
        BLOCK_PREFIX,
        id,
        BLOCK_EXTENSION,
        width = BLOCK_ID_DIGITS
    )
}

/// The ID after `last`. Wraps from [`MAX_BLOCK_ID`] back to 1 so every
/// name stays six digits; 0 is never handed out.
pub fn next_block_id(last: u64) -> u64 {
    if last >= MAX_BLOCK_ID { 1 } else { last + 1 }
}

/// Matches `^block_\d{6}\.mp3$` exactly.
pub fn is_valid_block_name(name: &str) -> bool {
    match name
        .strip_prefix(BLOCK_PREFIX)
        .and_then(|rest| rest.strip_suffix(BLOCK_EXTENSION))
    {
        Some(digits) => digits.len() == BLOCK_ID_DIGITS && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// A bare `.mp3` basename: no path separators, no parent references.
pub fn is_valid_music_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != ".."
        && name.len() > BLOCK_EXTENSION.len()
        && name.to_ascii_lowercase().ends_with(BLOCK_EXTENSION)
}

/// ID encoded in a valid block file name.
pub fn parse_block_id(name: &str) -> Option<u64> {
    if !is_valid_block_name(name) {
        return None;
    }
    name[BLOCK_PREFIX.len()..BLOCK_PREFIX.len() + BLOCK_ID_DIGITS]
        .parse()
        .ok()
}

/// Block files present in `dir`, by ID. A missing directory is empty.
pub fn list_block_files(dir: &Path) -> Vec<Block> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut blocks: Vec<Block> = entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| parse_block_id(&e.file_name().to_string_lossy()))
        .map(|id| Block::new(id, dir))
        .collect();
    blocks.sort_by_key(|b| b.id);
    blocks
}

/// Resolve a block name handed back by a consumer to its path.
pub fn resolve_block(blocks_dir: &Path, name: &str) -> Option<PathBuf> {
    if !is_valid_block_name(name) {
        return None;
    }
    let path = blocks_dir.join(name);
    path.is_file().then_some(path)
}

/// Fixed, ordered set of closing phrases handed out round-robin.
#[derive(Debug, Clone)]
pub struct ClosingRotation {
    phrases: Vec<String>,
    index: usize,
}

impl ClosingRotation {
    pub fn new(phrases: Vec<String>) -> Self {
        ClosingRotation { phrases, index: 0 }
    }

    /// The phrase for the next block. Empty when no phrases are configured.
    pub fn current(&self) -> String {
        self.phrases.get(self.index).cloned().unwrap_or_default()
    }

    /// Move to the following phrase once a block has been produced.
    pub fn advance(&mut self) {
        if !self.phrases.is_empty() {
            self.index = (self.index + 1) % self.phrases.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_zero_padded() {
        assert_eq!(block_file_name(1), "block_000001.mp3");
        assert_eq!(block_file_name(123456), "block_123456.mp3");
    }

    #[test]
    fn generated_names_validate() {
        for id in [0u64, 1, 42, 999_999] {
            assert!(is_valid_block_name(&block_file_name(id)));
        }
    }

    #[test]
    fn ids_wrap_within_six_digits() {
        assert_eq!(next_block_id(0), 1);
        assert_eq!(next_block_id(41), 42);
        assert_eq!(next_block_id(MAX_BLOCK_ID - 1), MAX_BLOCK_ID);
        assert_eq!(next_block_id(MAX_BLOCK_ID), 1);
        assert_eq!(next_block_id(5_000_000), 1);
        assert!(is_valid_block_name(&block_file_name(next_block_id(MAX_BLOCK_ID))));
    }

    #[test]
    fn block_name_validation() {
        assert!(is_valid_block_name("block_000001.mp3"));
        assert!(!is_valid_block_name("block_1.mp3"));
        assert!(!is_valid_block_name("block_0000001.mp3"));
        assert!(!is_valid_block_name("block_00000a.mp3"));
        assert!(!is_valid_block_name("../block_000001.mp3"));
        assert!(!is_valid_block_name("block_000001.mp3.bak"));
        assert!(!is_valid_block_name("block_000001.wav"));
    }

    #[test]
    fn music_name_validation() {
        assert!(is_valid_music_name("song.mp3"));
        assert!(is_valid_music_name("My Song (live).mp3"));
        assert!(!is_valid_music_name("dir/song.mp3"));
        assert!(!is_valid_music_name("dir\\song.mp3"));
        assert!(!is_valid_music_name("song.wav"));
        assert!(!is_valid_music_name(".mp3"));
        assert!(!is_valid_music_name(""));
    }

    #[test]
    fn parse_block_id_reads_digits() {
        assert_eq!(parse_block_id("block_000042.mp3"), Some(42));
        assert_eq!(parse_block_id("block_42.mp3"), None);
    }

    #[test]
    fn list_block_files_sorts_by_id() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["block_000010.mp3", "block_000002.mp3", "notes.txt", "block_000003.mp3.part"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let ids: Vec<u64> = list_block_files(dir.path()).iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![2, 10]);
        assert!(list_block_files(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn block_new_joins_dir() {
        let block = Block::new(7, Path::new("out/blocks"));
        assert_eq!(block.name, "block_000007.mp3");
        assert_eq!(block.path, PathBuf::from("out/blocks/block_000007.mp3"));
    }

    #[test]
    fn resolve_block_requires_valid_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("block_000003.mp3"), b"fake").unwrap();
        assert!(resolve_block(dir.path(), "block_000003.mp3").is_some());
        assert!(resolve_block(dir.path(), "block_000004.mp3").is_none());
        assert!(resolve_block(dir.path(), "block_3.mp3").is_none());
    }

    #[test]
    fn closings_alternate() {
        let mut rotation = ClosingRotation::new(vec!["A".into(), "B".into()]);
        let picks: Vec<String> = (0..5)
            .map(|_| {
                let phrase = rotation.current();
                rotation.advance();
                phrase
            })
            .collect();
        assert_eq!(picks, vec!["A", "B", "A", "B", "A"]);
        assert_eq!(rotation.current(), "B");
    }

    #[test]
    fn empty_rotation_yields_empty_phrase() {
        let mut rotation = ClosingRotation::new(vec![]);
        rotation.advance();
        assert_eq!(rotation.current(), "");
    }

    #[test]
    fn current_does_not_advance() {
        let mut rotation = ClosingRotation::new(vec!["A".into(), "B".into()]);
        assert_eq!(rotation.current(), "A");
        assert_eq!(rotation.current(), "A");
        rotation.advance();
        assert_eq!(rotation.current(), "B");
    }
}
