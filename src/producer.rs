//! Block production: script → speech → mix → `block_NNNNNN.mp3`.

use crate::audio::AudioBuffer;
use crate::block::Block;
use crate::config::StationConfig;
use crate::error::ProducerError;
use crate::mixer::{self, BedIntro};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Pause markers in scripts, spoken as a short pause.
const PAUSE_MARKERS: &[&str] = &["[pause]", "[pausa]"];
const SPOKEN_PAUSE: &str = " ... ";

/// Source of display text to be spoken.
pub trait ScriptProducer: Send + Sync {
    fn produce(&self) -> Result<String, ProducerError>;
}

/// Renders text to an audio asset on disk and returns its path.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<PathBuf, ProducerError>;
}

/// Turn pause markers into spoken pauses and trim the text.
pub fn prepare_for_speech(script: &str) -> String {
    let mut text = script.to_string();
    for marker in PAUSE_MARKERS {
        text = text.replace(marker, SPOKEN_PAUSE);
    }
    text.trim().to_string()
}

/// Script followed by the closing message.
pub fn compose_text(script: &str, closing: &str) -> String {
    let script = script.trim();
    let closing = closing.trim();
    if closing.is_empty() {
        script.to_string()
    } else {
        format!("{script}\n\n{closing}")
    }
}

pub struct BlockProducer {
    scripts: Box<dyn ScriptProducer>,
    voice: Box<dyn SpeechSynthesizer>,
    blocks_dir: PathBuf,
    bed_file: Option<PathBuf>,
    bed: BedIntro,
}

impl BlockProducer {
    pub fn new(
        scripts: Box<dyn ScriptProducer>,
        voice: Box<dyn SpeechSynthesizer>,
        blocks_dir: PathBuf,
    ) -> Self {
        BlockProducer {
            scripts,
            voice,
            blocks_dir,
            bed_file: None,
            bed: BedIntro::default(),
        }
    }

    /// Producer wired to the configured directories, bed and mix levels.
    pub fn from_config(
        config: &StationConfig,
        scripts: Box<dyn ScriptProducer>,
        voice: Box<dyn SpeechSynthesizer>,
    ) -> Self {
        let bed = BedIntro {
            bed_db: config.mix.bed_db,
            intro_seconds: config.mix.intro_seconds,
            intro_bed_db: config.mix.intro_bed_db,
            target_dbfs: config.mix.target_dbfs,
        };
        BlockProducer::new(scripts, voice, config.blocks_dir.clone())
            .with_bed(config.bed_file.clone(), bed)
    }

    pub fn with_bed(mut self, bed_file: Option<PathBuf>, bed: BedIntro) -> Self {
        self.bed_file = bed_file;
        self.bed = bed;
        self
    }

    pub fn blocks_dir(&self) -> &Path {
        &self.blocks_dir
    }

    /// Whether a bed file is configured and present on disk.
    pub fn bed_available(&self) -> bool {
        self.bed_file.as_deref().is_some_and(Path::is_file)
    }

    /// Produce one block.
    ///
    /// `allocate_id` is called only once the mix is ready, right before the
    /// file is written; a failed attempt consumes no ID. The file is written
    /// under a temporary name and renamed, so the returned block always
    /// refers to a complete file.
    pub fn produce_block<F>(
        &self,
        closing: &str,
        use_bed: bool,
        allocate_id: F,
    ) -> Result<Block, ProducerError>
    where
        F: FnOnce() -> u64,
    {
        let script = self.scripts.produce()?;
        if script.trim().is_empty() {
            return Err(ProducerError::Script("script producer returned no text".into()));
        }
        let text = prepare_for_speech(&compose_text(&script, closing));
        debug!(chars = text.len(), "script ready");

        let voice_path = self.voice.synthesize(&text)?;
        let voice = AudioBuffer::decode(&voice_path)?;
        debug!(voice = %voice_path.display(), ms = voice.duration_ms(), "voice rendered");

        let mixed = match self.bed_file.as_deref().filter(|_| use_bed) {
            Some(bed_path) if bed_path.is_file() => {
                let bed = AudioBuffer::decode(bed_path)?;
                mixer::bed_intro_overlay(&voice, &bed, &self.bed)
            }
            _ => mixer::normalize(&voice, self.bed.target_dbfs),
        };

        fs::create_dir_all(&self.blocks_dir)?;
        let block = Block::new(allocate_id(), &self.blocks_dir);
        let partial = self.blocks_dir.join(format!("{}.part", block.name));
        let written = fs::File::create(&partial)
            .map_err(ProducerError::from)
            .and_then(|file| mixed.write_mp3_to(file).map_err(ProducerError::from))
            .and_then(|()| fs::rename(&partial, &block.path).map_err(ProducerError::from));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        info!(block = %block.name, ms = mixed.duration_ms(), "block produced");
        Ok(block)
    }
}
