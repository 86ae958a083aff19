use crate::error::ConfigError;
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "station.json";
const APP_DIR: &str = "signal_radio";

/// How the ready queue is kept filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplenishMode {
    /// Top the queue up whenever it drops below the target depth.
    #[default]
    Continuous,
    /// Regenerate the whole block set once per period.
    Weekly,
}

/// Where scripts come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScriptSource {
    /// Rotate through `.txt` files in a directory.
    Directory { dir: PathBuf },
    /// Fetch a plain-text script from a URL.
    Http {
        url: String,
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },
    /// Read the top entries of an RSS or Atom news feed.
    Feed {
        url: String,
        #[serde(default = "default_top_n")]
        top_n: usize,
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },
}

/// Which speech synthesizer renders scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VoiceSource {
    /// External TTS program. `{output}` in `args` is replaced by the target
    /// audio path; the text is written to the program's stdin.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// ElevenLabs text-to-speech API (key from `ELEVENLABS_API_KEY`).
    Elevenlabs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_id: Option<String>,
    },
}

/// Gain envelope parameters for the mixing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixSettings {
    /// Music gain under the voice in a ducked overlay (dB).
    #[serde(default = "default_duck_db")]
    pub duck_db: f32,
    /// Bed gain under the voice (dB).
    #[serde(default = "default_bed_db")]
    pub bed_db: f32,
    /// Length of the bed-only intro before speech starts.
    #[serde(default = "default_intro_seconds")]
    pub intro_seconds: f32,
    /// Bed gain during the intro (dB).
    #[serde(default = "default_intro_bed_db")]
    pub intro_bed_db: f32,
    /// Loudness target for finished blocks (dBFS).
    #[serde(default = "default_target_dbfs")]
    pub target_dbfs: f32,
}

impl Default for MixSettings {
    fn default() -> Self {
        MixSettings {
            duck_db: default_duck_db(),
            bed_db: default_bed_db(),
            intro_seconds: default_intro_seconds(),
            intro_bed_db: default_intro_bed_db(),
            target_dbfs: default_target_dbfs(),
        }
    }
}

/// Station configuration, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_blocks_dir")]
    pub blocks_dir: PathBuf,
    #[serde(default = "default_music_dir")]
    pub music_dir: PathBuf,
    /// Scanned when `music_dir` holds no tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_music_dir: Option<PathBuf>,
    /// Looping ambience placed under every block. Missing file or `null` = no bed.
    #[serde(default = "default_bed_file")]
    pub bed_file: Option<PathBuf>,
    #[serde(default = "default_marker_file")]
    pub marker_file: PathBuf,

    #[serde(default)]
    pub mode: ReplenishMode,
    /// Below this depth the replenisher refills quickly.
    #[serde(default = "default_min_depth")]
    pub min_depth: usize,
    #[serde(default = "default_target_depth")]
    pub target_depth: usize,
    #[serde(default = "default_refill_interval_secs")]
    pub refill_interval_secs: u64,
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
    #[serde(default = "default_failure_backoff_secs")]
    pub failure_backoff_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_secs")]
    pub batch_delay_secs: u64,
    /// Day of the week the batch regenerates (0=Mon..6=Sun).
    #[serde(default)]
    pub trigger_day: u8,
    #[serde(default = "default_period_days")]
    pub period_days: i64,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    #[serde(default)]
    pub mix: MixSettings,
    #[serde(default = "default_closings")]
    pub closings: Vec<String>,

    #[serde(default = "default_scripts")]
    pub scripts: ScriptSource,
    #[serde(default = "default_voice")]
    pub voice: VoiceSource,
}

fn default_http_timeout_secs() -> u64 {
    30
}
fn default_top_n() -> usize {
    3
}
fn default_duck_db() -> f32 {
    -20.0
}
fn default_bed_db() -> f32 {
    -25.0
}
fn default_intro_seconds() -> f32 {
    2.5
}
fn default_intro_bed_db() -> f32 {
    -6.0
}
fn default_target_dbfs() -> f32 {
    -2.0
}
fn default_blocks_dir() -> PathBuf {
    PathBuf::from("output/blocks")
}
fn default_music_dir() -> PathBuf {
    PathBuf::from("assets/music")
}
fn default_bed_file() -> Option<PathBuf> {
    Some(PathBuf::from("assets/beds/news_bed.mp3"))
}
fn default_marker_file() -> PathBuf {
    PathBuf::from("output/last_weekly_generation.txt")
}
fn default_min_depth() -> usize {
    2
}
fn default_target_depth() -> usize {
    3
}
fn default_refill_interval_secs() -> u64 {
    2
}
fn default_idle_interval_secs() -> u64 {
    30
}
fn default_failure_backoff_secs() -> u64 {
    60
}
fn default_batch_size() -> usize {
    6
}
fn default_batch_delay_secs() -> u64 {
    5
}
fn default_period_days() -> i64 {
    7
}
fn default_check_interval_secs() -> u64 {
    3600
}
fn default_closings() -> Vec<String> {
    vec![
        "That was the news. Stay with us, the music is back right now.".to_string(),
        "You are listening to Signal Radio. More updates after the next songs.".to_string(),
    ]
}
fn default_scripts() -> ScriptSource {
    ScriptSource::Directory {
        dir: PathBuf::from("assets/scripts"),
    }
}
fn default_voice() -> VoiceSource {
    VoiceSource::Elevenlabs {
        voice_id: None,
        model_id: None,
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            blocks_dir: default_blocks_dir(),
            music_dir: default_music_dir(),
            fallback_music_dir: None,
            bed_file: default_bed_file(),
            marker_file: default_marker_file(),
            mode: ReplenishMode::default(),
            min_depth: default_min_depth(),
            target_depth: default_target_depth(),
            refill_interval_secs: default_refill_interval_secs(),
            idle_interval_secs: default_idle_interval_secs(),
            failure_backoff_secs: default_failure_backoff_secs(),
            batch_size: default_batch_size(),
            batch_delay_secs: default_batch_delay_secs(),
            trigger_day: 0,
            period_days: default_period_days(),
            check_interval_secs: default_check_interval_secs(),
            mix: MixSettings::default(),
            closings: default_closings(),
            scripts: default_scripts(),
            voice: default_voice(),
        }
    }
}

impl StationConfig {
    /// `station.json` under the user's config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: StationConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `explicit` if given, else the default path if it exists, else
    /// built-in defaults. Returns the path the config came from.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Ok((Self::load(&path)?, Some(path))),
            _ => Ok((StationConfig::default(), None)),
        }
    }

    /// Persist as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_depth == 0 {
            return Err(ConfigError::Invalid("target_depth must be at least 1".into()));
        }
        if self.min_depth > self.target_depth {
            return Err(ConfigError::Invalid(format!(
                "min_depth ({}) exceeds target_depth ({})",
                self.min_depth, self.target_depth
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.closings.is_empty() {
            return Err(ConfigError::Invalid("closings must not be empty".into()));
        }
        if self.period_days <= 0 {
            return Err(ConfigError::Invalid("period_days must be positive".into()));
        }
        if let ScriptSource::Feed { top_n: 0, .. } = self.scripts {
            return Err(ConfigError::Invalid("feed top_n must be at least 1".into()));
        }
        if self.trigger_day > 6 {
            return Err(ConfigError::Invalid(format!(
                "trigger_day {} out of range (0=Mon..6=Sun)",
                self.trigger_day
            )));
        }
        Ok(())
    }

    /// Scratch directory for synthesized voice audio, next to the blocks.
    pub fn voice_dir(&self) -> PathBuf {
        match self.blocks_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join("voice"),
            _ => PathBuf::from("voice"),
        }
    }

    /// Bed file, if configured and present on disk.
    pub fn available_bed(&self) -> Option<&Path> {
        self.bed_file.as_deref().filter(|p| p.is_file())
    }

    pub fn trigger_weekday(&self) -> Weekday {
        weekday_from_index(self.trigger_day)
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs(self.refill_interval_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_secs(self.batch_delay_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Map 0=Mon..6=Sun to a weekday; out-of-range values wrap.
pub fn weekday_from_index(day: u8) -> Weekday {
    match day % 7 {
        0 => Weekday::Mon,
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        _ => Weekday::Sun,
    }
}
