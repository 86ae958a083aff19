//! Local programme playback through the default audio device.

use crate::error::AudioError;
use crate::replenish::sleep_while_running;
use crate::station::{NextItem, Station};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// How often a playing sink is checked for completion or stop.
const PLAYBACK_POLL: Duration = Duration::from_millis(100);

/// Something that can play a file to the end.
pub trait ProgrammeOutput {
    /// Play `path`, returning when it has finished or `running` is cleared.
    fn play_to_end(&mut self, path: &Path, running: &AtomicBool) -> Result<(), AudioError>;
}

/// Runtime audio player wrapping rodio. Created fresh per session.
pub struct Player {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
}

impl Player {
    /// Open the default audio output.
    pub fn new() -> Result<Self, AudioError> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| AudioError::Output(format!("failed to open audio output: {e}")))?;
        Ok(Player {
            _stream: stream,
            stream_handle: handle,
        })
    }

    /// Decode `path` onto a new sink and start it.
    fn start(&self, path: &Path) -> Result<Sink, AudioError> {
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| AudioError::Output(format!("failed to create sink: {e}")))?;
        let file = File::open(path).map_err(|source| AudioError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| AudioError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        sink.append(source);
        sink.play();
        Ok(sink)
    }
}

impl ProgrammeOutput for Player {
    fn play_to_end(&mut self, path: &Path, running: &AtomicBool) -> Result<(), AudioError> {
        let sink = self.start(path)?;
        while !sink.empty() {
            if !running.load(Ordering::Relaxed) {
                sink.stop();
                break;
            }
            thread::sleep(PLAYBACK_POLL);
        }
        Ok(())
    }
}

/// Play the programme until `running` is cleared: ask the station for the
/// next item, play it through, repeat. When nothing is ready, wait `poll`
/// and ask again. A file that fails to play is skipped. Returns the number
/// of items handed out.
pub fn run_programme<O: ProgrammeOutput>(
    station: &Station,
    output: &mut O,
    running: &AtomicBool,
    poll: Duration,
) -> usize {
    let mut played = 0;
    while running.load(Ordering::Relaxed) {
        let item = station.next();
        let (kind, path) = match &item {
            NextItem::News(block) => ("news", block.path.as_path()),
            NextItem::Music(track) => ("music", track.path.as_path()),
            NextItem::NotReady(reason) => {
                info!(reason = reason.message(), "nothing to play yet");
                sleep_while_running(running, poll);
                continue;
            }
        };
        played += 1;
        info!(kind, file = %path.display(), "now playing");
        if let Err(e) = output.play_to_end(path, running) {
            warn!(error = %e, "playback failed, skipping");
        }
    }
    played
}
