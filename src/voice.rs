//! Speech synthesizers.

use crate::config::VoiceSource;
use crate::error::ProducerError;
use crate::http::{self, RetryPolicy};
use crate::producer::SpeechSynthesizer;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

const OUTPUT_PLACEHOLDER: &str = "{output}";

const ELEVENLABS_URL: &str = "https://api.elevenlabs.io";
const ELEVENLABS_KEY_VAR: &str = "ELEVENLABS_API_KEY";
const ELEVENLABS_VOICE_VAR: &str = "ELEVENLABS_VOICE_ID";
const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";
const OUTPUT_FORMAT: &str = "mp3_44100_128";

/// Runs an external TTS program. The text goes to its stdin and every
/// `{output}` in the arguments is replaced with the target file.
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    output: PathBuf,
}

impl CommandSynthesizer {
    pub fn new(program: String, args: Vec<String>, work_dir: &Path) -> Self {
        CommandSynthesizer {
            program,
            args,
            output: work_dir.join("voice_latest.wav"),
        }
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn synthesize(&self, text: &str) -> Result<PathBuf, ProducerError> {
        if let Some(parent) = self.output.parent() {
            fs::create_dir_all(parent)?;
        }
        let _ = fs::remove_file(&self.output);

        let output = self.output.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(OUTPUT_PLACEHOLDER, &output))
            .collect();

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProducerError::Synthesis(format!("cannot run '{}': {e}", self.program)))?;

        // stdin is fed from its own thread while stderr is drained here, so a
        // chatty program cannot block on a full pipe. A program that takes
        // its text from arguments may exit without reading stdin; its exit
        // status decides the outcome.
        let stdin = child.stdin.take();
        let (written, result) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => match stdin.write_all(text.as_bytes()) {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                },
                None => Ok(()),
            });
            let result = child.wait_with_output();
            let written = writer.join().unwrap_or_else(|_| {
                Err(std::io::Error::other("stdin writer panicked"))
            });
            (written, result)
        });
        let result = result?;
        written?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ProducerError::Synthesis(format!(
                "'{}' exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }
        if !self.output.is_file() {
            return Err(ProducerError::Synthesis(format!(
                "'{}' produced no audio at '{}'",
                self.program,
                self.output.display()
            )));
        }
        Ok(self.output.clone())
    }
}

/// ElevenLabs text-to-speech. The API key is read when synthesizing, so a
/// missing key fails production instead of startup.
pub struct ElevenLabsSynthesizer {
    base_url: String,
    voice_id: String,
    model_id: String,
    output: PathBuf,
    policy: RetryPolicy,
}

impl ElevenLabsSynthesizer {
    pub fn new(voice_id: Option<String>, model_id: Option<String>, work_dir: &Path) -> Self {
        let voice_id = voice_id
            .or_else(|| std::env::var(ELEVENLABS_VOICE_VAR).ok())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string());
        ElevenLabsSynthesizer {
            base_url: ELEVENLABS_URL.to_string(),
            voice_id,
            model_id: model_id.unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            output: work_dir.join("voice_latest.mp3"),
            policy: RetryPolicy::with_timeout(Duration::from_secs(120)),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}?output_format={}",
            self.base_url.trim_end_matches('/'),
            self.voice_id,
            OUTPUT_FORMAT
        )
    }

    fn render(&self, key: &str, text: &str) -> Result<PathBuf, ProducerError> {
        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
        });
        let headers = [("xi-api-key", key), ("Accept", "audio/mpeg")];
        let audio = http::post_json_for_bytes(&self.endpoint(), &headers, &body, &self.policy)
            .map_err(ProducerError::Synthesis)?;
        if audio.is_empty() {
            return Err(ProducerError::Synthesis("empty audio response".into()));
        }

        if let Some(parent) = self.output.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.output, &audio)?;
        Ok(self.output.clone())
    }
}

impl SpeechSynthesizer for ElevenLabsSynthesizer {
    fn synthesize(&self, text: &str) -> Result<PathBuf, ProducerError> {
        let key = std::env::var(ELEVENLABS_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProducerError::Synthesis(format!("{ELEVENLABS_KEY_VAR} is not set")))?;
        self.render(&key, text)
    }
}

/// Build the configured synthesizer; intermediate audio goes to `work_dir`.
pub fn from_config(source: &VoiceSource, work_dir: &Path) -> Box<dyn SpeechSynthesizer> {
    match source {
        VoiceSource::Command { program, args } => Box::new(CommandSynthesizer::new(
            program.clone(),
            args.clone(),
            work_dir,
        )),
        VoiceSource::Elevenlabs { voice_id, model_id } => Box::new(ElevenLabsSynthesizer::new(
            voice_id.clone(),
            model_id.clone(),
            work_dir,
        )),
    }
}
