//! Whole-file PCM buffers: decoding, format conformance, encoding.
//!
//! Samples are interleaved `f32` in [-1, 1]. Decoding goes through rodio's
//! decoder (MP3, WAV, FLAC, OGG). Blocks are encoded to MP3 with LAME; WAV
//! output is available for ad-hoc exports.

use crate::error::AudioError;
use mp3lame_encoder::{Builder, FlushNoGap, InterleavedPcm, Quality};
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

/// Sample rates the MP3 encoder accepts without resampling.
const MP3_SAMPLE_RATES: &[u32] = &[8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000];
const MP3_FALLBACK_RATE: u32 = 44100;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let sample_rate = sample_rate.max(1);
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        AudioBuffer {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Silence of the given number of frames.
    pub fn silent(frames: usize, sample_rate: u32, channels: u16) -> Self {
        AudioBuffer::new(vec![0.0; frames * channels.max(1) as usize], sample_rate, channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length in whole milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    /// Number of frames covering `ms` milliseconds at this buffer's rate.
    pub fn frames_for_ms(&self, ms: u64) -> usize {
        (ms * self.sample_rate as u64 / 1000) as usize
    }

    /// Frames `[start, end)`, clamped to the buffer. Slicing past the end
    /// yields whatever is left, possibly nothing.
    pub fn slice_frames(&self, start: usize, end: usize) -> AudioBuffer {
        let ch = self.channels as usize;
        let end = end.min(self.frames());
        let start = start.min(end);
        AudioBuffer {
            samples: self.samples[start * ch..end * ch].to_vec(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Frames from `start` to the end.
    pub fn slice_from(&self, start: usize) -> AudioBuffer {
        self.slice_frames(start, self.frames())
    }

    /// Append another buffer of the same format.
    pub fn append(&mut self, other: &AudioBuffer) {
        debug_assert_eq!(self.sample_rate, other.sample_rate);
        debug_assert_eq!(self.channels, other.channels);
        self.samples.extend_from_slice(&other.samples);
    }

    /// Pad with silence (or cut) to exactly `frames` frames.
    pub fn resize_frames(&mut self, frames: usize) {
        self.samples.resize(frames * self.channels as usize, 0.0);
    }

    /// Repeat the buffer end-to-end until it covers at least `frames`, then
    /// cut to exactly `frames`. An empty buffer becomes silence.
    pub fn looped_to(&self, frames: usize) -> AudioBuffer {
        let ch = self.channels as usize;
        let mut samples = Vec::with_capacity(frames * ch);
        if !self.samples.is_empty() {
            while samples.len() < frames * ch {
                samples.extend_from_slice(&self.samples);
            }
        }
        samples.resize(frames * ch, 0.0);
        AudioBuffer {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Convert to another sample rate and channel count. Resampling is
    /// linear interpolation; channels are averaged down to mono, duplicated
    /// up from mono, and otherwise mapped by index modulo the source count.
    pub fn conform_to(&self, sample_rate: u32, channels: u16) -> AudioBuffer {
        let remapped = self.with_channels(channels.max(1));
        if remapped.sample_rate == sample_rate.max(1) {
            return remapped;
        }
        remapped.resampled(sample_rate.max(1))
    }

    fn with_channels(&self, channels: u16) -> AudioBuffer {
        if channels == self.channels {
            return self.clone();
        }
        let src = self.channels as usize;
        let dst = channels as usize;
        let mut samples = Vec::with_capacity(self.frames() * dst);
        for frame in self.samples.chunks_exact(src) {
            if dst == 1 {
                samples.push(frame.iter().sum::<f32>() / src as f32);
            } else {
                for c in 0..dst {
                    samples.push(frame[c % src]);
                }
            }
        }
        AudioBuffer {
            samples,
            sample_rate: self.sample_rate,
            channels,
        }
    }

    fn resampled(&self, sample_rate: u32) -> AudioBuffer {
        let ch = self.channels as usize;
        let src_frames = self.frames();
        let dst_frames =
            (src_frames as u64 * sample_rate as u64 / self.sample_rate as u64) as usize;
        let step = self.sample_rate as f64 / sample_rate as f64;
        let mut samples = Vec::with_capacity(dst_frames * ch);
        for i in 0..dst_frames {
            let pos = i as f64 * step;
            let i0 = (pos.floor() as usize).min(src_frames.saturating_sub(1));
            let i1 = (i0 + 1).min(src_frames.saturating_sub(1));
            let frac = (pos - i0 as f64) as f32;
            for c in 0..ch {
                let a = self.samples[i0 * ch + c];
                let b = self.samples[i1 * ch + c];
                samples.push(a + (b - a) * frac);
            }
        }
        AudioBuffer {
            samples,
            sample_rate,
            channels: self.channels,
        }
    }

    /// Decode a whole audio file into memory.
    pub fn decode(path: &Path) -> Result<AudioBuffer, AudioError> {
        let file = File::open(path).map_err(|source| AudioError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let decoder = Decoder::new(BufReader::new(file)).map_err(|e| AudioError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();
        let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();
        Ok(AudioBuffer::new(samples, sample_rate, channels))
    }

    /// Write to `path`, choosing the encoder from the extension
    /// (`mp3` or `wav`).
    pub fn write(&self, path: &Path) -> Result<(), AudioError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mp3" => {
                let file = File::create(path)?;
                self.write_mp3_to(file)
            }
            "wav" => self.write_wav(path),
            other => Err(AudioError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Encode as 16-bit PCM WAV.
    pub fn write_wav(&self, path: &Path) -> Result<(), AudioError> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &s in &self.samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Encode as 192 kbps stereo MP3. Mono and multichannel input is
    /// mapped to stereo; rates LAME does not accept are resampled.
    pub fn write_mp3_to<W: Write>(&self, mut writer: W) -> Result<(), AudioError> {
        let rate = if MP3_SAMPLE_RATES.contains(&self.sample_rate) {
            self.sample_rate
        } else {
            MP3_FALLBACK_RATE
        };
        let stereo = self.conform_to(rate, 2);

        let mut encoder = Builder::new()
            .ok_or_else(|| AudioError::Encode("failed to create LAME encoder".into()))?
            .with_num_channels(2)
            .map_err(|e| AudioError::Encode(format!("LAME set_num_channels failed: {e:?}")))?
            .with_sample_rate(rate)
            .map_err(|e| AudioError::Encode(format!("LAME set_sample_rate failed: {e:?}")))?
            .with_brate(mp3lame_encoder::Bitrate::Kbps192)
            .map_err(|e| AudioError::Encode(format!("LAME set_brate failed: {e:?}")))?
            .with_quality(Quality::Best)
            .map_err(|e| AudioError::Encode(format!("LAME set_quality failed: {e:?}")))?
            .build()
            .map_err(|e| AudioError::Encode(format!("LAME build failed: {e:?}")))?;

        let mut buf = Vec::new();
        buf.reserve(mp3lame_encoder::max_required_buffer_size(stereo.frames()));

        let encoded_size = encoder
            .encode(InterleavedPcm(stereo.samples()), buf.spare_capacity_mut())
            .map_err(|e| AudioError::Encode(format!("LAME encode failed: {e:?}")))?;
        // SAFETY: encode filled exactly `encoded_size` bytes into spare capacity.
        unsafe { buf.set_len(encoded_size) };

        let flush_size = encoder
            .flush::<FlushNoGap>(buf.spare_capacity_mut())
            .map_err(|e| AudioError::Encode(format!("LAME flush failed: {e:?}")))?;
        // SAFETY: flush filled exactly `flush_size` bytes into spare capacity.
        unsafe { buf.set_len(buf.len() + flush_size) };

        writer.write_all(&buf)?;
        Ok(())
    }
}
