//! Mixing engine: gain envelopes over whole in-memory buffers.
//!
//! Gains are linear in dB and applied multiplicatively; every gain and
//! overlay clips to [-1, 1]. Overlays are time-aligned at frame 0 and the
//! secondary input is conformed to the primary's format first.

use crate::audio::AudioBuffer;

/// Music gain under the voice in a ducked overlay.
pub const DUCK_DB: f32 = -20.0;
/// Bed gain under the voice.
pub const BED_DB: f32 = -25.0;
/// Bed-only intro before speech starts.
pub const INTRO_SECONDS: f32 = 2.5;
/// Bed gain during the intro.
pub const INTRO_BED_DB: f32 = -6.0;
/// Voice loudness target before it goes over the bed.
pub const VOICE_TARGET_DBFS: f32 = -3.0;
/// Maximum boost applied to the voice, keeps noise floors down.
pub const VOICE_MAX_BOOST_DB: f32 = 10.0;
/// Loudness target for finished blocks.
pub const TARGET_DBFS: f32 = -2.0;
/// Gain limit for loudness normalization.
pub const MAX_NORMALIZE_DB: f32 = 12.0;

/// Parameters for [`bed_intro_overlay`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BedIntro {
    pub bed_db: f32,
    pub intro_seconds: f32,
    pub intro_bed_db: f32,
    pub target_dbfs: f32,
}

impl Default for BedIntro {
    fn default() -> Self {
        BedIntro {
            bed_db: BED_DB,
            intro_seconds: INTRO_SECONDS,
            intro_bed_db: INTRO_BED_DB,
            target_dbfs: TARGET_DBFS,
        }
    }
}

impl BedIntro {
    fn intro_ms(&self) -> u64 {
        (self.intro_seconds.max(0.0) * 1000.0) as u64
    }
}

pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// RMS loudness in dBFS (full scale = 1.0). `None` for empty or silent
/// buffers, whose loudness cannot be measured.
pub fn dbfs(buf: &AudioBuffer) -> Option<f32> {
    let samples = buf.samples();
    if samples.is_empty() {
        return None;
    }
    let mean_sq = samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>()
        / samples.len() as f64;
    let rms = mean_sq.sqrt();
    if rms <= 0.0 || !rms.is_finite() {
        return None;
    }
    Some((20.0 * rms.log10()) as f32)
}

/// Scale by `db` decibels.
pub fn apply_gain(buf: &AudioBuffer, db: f32) -> AudioBuffer {
    let mut out = buf.clone();
    let gain = db_to_gain(db);
    for s in out.samples_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
    out
}

/// Add `top` onto `base` from frame 0. The result has `base`'s format and
/// length; any part of `top` past the end of `base` is dropped.
pub fn overlay(base: &AudioBuffer, top: &AudioBuffer) -> AudioBuffer {
    let top = top.conform_to(base.sample_rate(), base.channels());
    let mut out = base.clone();
    for (s, t) in out.samples_mut().iter_mut().zip(top.samples()) {
        *s = (*s + t).clamp(-1.0, 1.0);
    }
    out
}

/// Lower the music by `duck_db` for as long as the voice speaks, with the
/// voice on top, then let the rest of the music play untouched.
///
/// Output length is `V + max(0, M - V)`: when the music is shorter than the
/// voice, the ducked section is padded with silence to the voice length.
pub fn ducked_overlay(music: &AudioBuffer, voice: &AudioBuffer, duck_db: f32) -> AudioBuffer {
    let voice = voice.conform_to(music.sample_rate(), music.channels());
    let voice_frames = voice.frames();

    let mut ducked = apply_gain(&music.slice_frames(0, voice_frames), duck_db);
    ducked.resize_frames(voice_frames);

    let mut mixed = overlay(&ducked, &voice);
    mixed.append(&music.slice_from(voice_frames));
    mixed
}

/// Narration over a looping bed: a bed-only intro at `intro_bed_db`, then
/// the bed drops to `bed_db` and the voice (from the intro point on) plays
/// over it. The output is exactly as long as the voice.
pub fn bed_intro_overlay(voice: &AudioBuffer, bed: &AudioBuffer, params: &BedIntro) -> AudioBuffer {
    let voice = normalize_within(voice, VOICE_TARGET_DBFS, f32::NEG_INFINITY, VOICE_MAX_BOOST_DB);
    let total = voice.frames();
    let bed = bed
        .conform_to(voice.sample_rate(), voice.channels())
        .looped_to(total);
    let intro = voice.frames_for_ms(params.intro_ms()).min(total);

    let mut mixed = apply_gain(&bed.slice_frames(0, intro), params.intro_bed_db);
    let bed_rest = apply_gain(&bed.slice_from(intro), params.bed_db);
    mixed.append(&overlay(&bed_rest, &voice.slice_from(intro)));

    normalize_within(&mixed, params.target_dbfs, f32::NEG_INFINITY, MAX_NORMALIZE_DB)
}

/// Bring loudness to `target_dbfs`, with the correction limited to ±12 dB.
/// Silent or empty buffers come back unchanged.
pub fn normalize(buf: &AudioBuffer, target_dbfs: f32) -> AudioBuffer {
    normalize_within(buf, target_dbfs, -MAX_NORMALIZE_DB, MAX_NORMALIZE_DB)
}

fn normalize_within(buf: &AudioBuffer, target_dbfs: f32, min_db: f32, max_db: f32) -> AudioBuffer {
    match dbfs(buf) {
        Some(current) => apply_gain(buf, (target_dbfs - current).clamp(min_db, max_db)),
        None => buf.clone(),
    }
}
