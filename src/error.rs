//! Error types for signal_radio.

use std::path::PathBuf;

/// Failure to decode, encode or write an audio asset.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("cannot open '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot decode '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("encode: {0}")]
    Encode(String),

    #[error("audio output: {0}")]
    Output(String),

    #[error("unsupported output format '{0}'")]
    UnsupportedFormat(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for AudioError {
    fn from(error: hound::Error) -> Self {
        AudioError::Encode(error.to_string())
    }
}

/// A block could not be produced. Always transient from the scheduler's
/// point of view: the replenisher logs it and retries after a backoff.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("script: {0}")]
    Script(String),

    #[error("synthesis: {0}")]
    Synthesis(String),

    #[error("audio: {0}")]
    Audio(#[from] AudioError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid or unreadable station configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
