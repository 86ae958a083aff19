//! Headless integration tests for signal_radio.
//!
//! These drive the station end to end through the public API with fake
//! script and speech collaborators. No audio device is needed.

use chrono::{Duration as ChronoDuration, Utc};
use signal_radio::audio::AudioBuffer;
use signal_radio::block::{is_valid_block_name, list_block_files};
use signal_radio::catalog::TrackCatalog;
use signal_radio::config::StationConfig;
use signal_radio::error::ProducerError;
use signal_radio::mixer::BedIntro;
use signal_radio::producer::{BlockProducer, ScriptProducer, SpeechSynthesizer};
use signal_radio::replenish::{ReplenishPolicy, ReplenisherHandle, replenish_once, ReplenishOutcome};
use signal_radio::station::{ItemKind, NextItem, NotReady, Station};
use signal_radio::weekly::{self, BatchPolicy};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Fakes ────────────────────────────────────────────────────────────────

struct CountingScripts {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingScripts {
    fn ok() -> Self {
        CountingScripts {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        CountingScripts {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }
}

impl ScriptProducer for CountingScripts {
    fn produce(&self) -> Result<String, ProducerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(ProducerError::Script("feed unreachable".into()));
        }
        Ok(format!("Bulletin number {n}. [pause] That is all."))
    }
}

/// Renders every text as half a second of tone and keeps the texts.
struct ToneSynth {
    dir: PathBuf,
    texts: Arc<Mutex<Vec<String>>>,
}

impl SpeechSynthesizer for ToneSynth {
    fn synthesize(&self, text: &str) -> Result<PathBuf, ProducerError> {
        let mut texts = self.texts.lock().unwrap();
        texts.push(text.to_string());
        let path = self.dir.join(format!("voice_{}.wav", texts.len()));
        let samples = (0..4000).map(|i| 0.4 * (i as f32 * 0.07).sin()).collect();
        AudioBuffer::new(samples, 8000, 1).write_wav(&path)?;
        Ok(path)
    }
}

struct Rig {
    _root: tempfile::TempDir,
    blocks: PathBuf,
    music: PathBuf,
    texts: Arc<Mutex<Vec<String>>>,
}

impl Rig {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let blocks = root.path().join("blocks");
        let music = root.path().join("music");
        std::fs::create_dir_all(&music).unwrap();
        Rig {
            blocks,
            music,
            texts: Arc::new(Mutex::new(Vec::new())),
            _root: root,
        }
    }

    fn root(&self) -> &Path {
        self._root.path()
    }

    fn add_tracks(&self, n: usize) {
        for i in 0..n {
            std::fs::write(self.music.join(format!("song_{i:02}.mp3")), b"fake").unwrap();
        }
    }

    fn station(&self, closings: &[&str]) -> Station {
        Station::new(
            TrackCatalog::new(self.music.clone(), None),
            fastrand::Rng::with_seed(11),
            closings.iter().map(|c| c.to_string()).collect(),
        )
    }

    fn producer(&self, scripts: CountingScripts) -> BlockProducer {
        let voice_dir = self.root().join("voice");
        std::fs::create_dir_all(&voice_dir).unwrap();
        BlockProducer::new(
            Box::new(scripts),
            Box::new(ToneSynth {
                dir: voice_dir,
                texts: self.texts.clone(),
            }),
            self.blocks.clone(),
        )
    }

    fn batch_policy(&self, size: usize) -> BatchPolicy {
        BatchPolicy {
            batch_size: size,
            batch_delay: Duration::ZERO,
            trigger: chrono::Weekday::Mon,
            period_days: 7,
            check_interval: Duration::from_millis(10),
            marker_file: self.root().join("marker.txt"),
            blocks_dir: self.blocks.clone(),
        }
    }
}

fn kind(item: &NextItem) -> Option<ItemKind> {
    item.to_response().kind
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    done()
}

// ── Programme cycle ──────────────────────────────────────────────────────

#[test]
fn cycle_end_to_end() {
    let rig = Rig::new();
    rig.add_tracks(4);
    let station = rig.station(&["Goodnight."]);
    let producer = rig.producer(CountingScripts::ok());

    // Nothing produced yet.
    assert_eq!(station.next(), NextItem::NotReady(NotReady::QueueEmpty));
    assert_eq!(station.cycle_index(), 0);
    assert!(!station.status().can_play);

    // One block: news.
    let block = station.produce_into_queue(&producer).unwrap();
    assert_eq!(block.name, "block_000001.mp3");
    assert!(block.path.is_file());
    assert!(station.status().can_play);

    let first = station.next();
    assert_eq!(first, NextItem::News(block));
    assert_eq!(station.cycle_index(), 1);

    // Then two music turns.
    assert_eq!(kind(&station.next()), Some(ItemKind::Music));
    assert_eq!(kind(&station.next()), Some(ItemKind::Music));
    assert_eq!(station.cycle_index(), 3);

    // News turn again with an empty queue: waits without advancing.
    assert!(!station.next().is_ready());
    assert_eq!(station.cycle_index(), 3);
}

#[test]
fn music_turns_fall_back_to_blocks_without_music() {
    let rig = Rig::new();
    let station = rig.station(&["Bye."]);
    let producer = rig.producer(CountingScripts::ok());
    for _ in 0..3 {
        station.produce_into_queue(&producer).unwrap();
    }

    let names: Vec<String> = (0..3)
        .map(|_| match station.next() {
            NextItem::News(block) => block.name,
            other => panic!("expected a block, got {other:?}"),
        })
        .collect();
    assert_eq!(
        names,
        vec!["block_000001.mp3", "block_000002.mp3", "block_000003.mp3"]
    );
    assert_eq!(station.next(), NextItem::NotReady(NotReady::QueueEmpty));
}

#[test]
fn closings_rotate_per_produced_block() {
    let rig = Rig::new();
    let station = rig.station(&["Stay tuned.", "See you soon."]);
    let producer = rig.producer(CountingScripts::ok());
    for _ in 0..3 {
        station.produce_into_queue(&producer).unwrap();
    }

    let texts = rig.texts.lock().unwrap();
    assert_eq!(texts.len(), 3);
    assert!(texts[0].ends_with("Stay tuned."));
    assert!(texts[1].ends_with("See you soon."));
    assert!(texts[2].ends_with("Stay tuned."));
    // Pause markers never reach the synthesizer.
    assert!(texts.iter().all(|t| !t.contains("[pause]") && t.contains(" ... ")));
}

#[test]
fn failed_production_leaves_queue_and_ids_untouched() {
    let rig = Rig::new();
    let station = rig.station(&["Bye."]);
    let failing = rig.producer(CountingScripts::failing());
    assert!(station.produce_into_queue(&failing).is_err());
    assert_eq!(station.ready_count(), 0);

    let working = rig.producer(CountingScripts::ok());
    let block = station.produce_into_queue(&working).unwrap();
    assert_eq!(block.id, 1);
}

#[test]
fn numbering_wraps_after_last_six_digit_block() {
    let rig = Rig::new();
    std::fs::create_dir_all(&rig.blocks).unwrap();
    std::fs::write(rig.blocks.join("block_999999.mp3"), b"left over").unwrap();

    let station = rig.station(&["Bye."]);
    let last = list_block_files(&rig.blocks).last().unwrap().id;
    station.continue_ids_after(last);
    let block = station
        .produce_into_queue(&rig.producer(CountingScripts::ok()))
        .unwrap();

    assert_eq!(block.name, "block_000001.mp3");
    assert!(is_valid_block_name(&block.name));
    let ids: Vec<u64> = list_block_files(&rig.blocks).iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![1, 999_999]);
}

#[test]
fn bed_mix_produces_block() {
    let rig = Rig::new();
    let bed = rig.root().join("bed.wav");
    AudioBuffer::new(vec![0.1; 8000], 8000, 1)
        .write_wav(&bed)
        .unwrap();
    let station = rig.station(&["Bye."]);
    let producer = rig
        .producer(CountingScripts::ok())
        .with_bed(Some(bed), BedIntro::default());

    let block = station.produce_into_queue(&producer).unwrap();
    let decoded = AudioBuffer::decode(&block.path).unwrap();
    assert!(decoded.duration_ms() > 0);
}

// ── Replenishment ────────────────────────────────────────────────────────

fn quick_policy() -> ReplenishPolicy {
    ReplenishPolicy {
        min_depth: 2,
        target_depth: 3,
        refill_interval: Duration::from_millis(10),
        idle_interval: Duration::from_millis(10),
        failure_backoff: Duration::from_millis(10),
    }
}

#[test]
fn replenish_once_stops_at_target() {
    let rig = Rig::new();
    let station = rig.station(&["Bye."]);
    let producer = rig.producer(CountingScripts::ok());
    let policy = quick_policy();

    assert_eq!(
        replenish_once(&station, &producer, &policy),
        ReplenishOutcome::Produced { depth: 1 }
    );
    replenish_once(&station, &producer, &policy);
    replenish_once(&station, &producer, &policy);
    assert_eq!(
        replenish_once(&station, &producer, &policy),
        ReplenishOutcome::Full { depth: 3 }
    );
}

#[test]
fn replenish_failure_is_swallowed() {
    let rig = Rig::new();
    let station = rig.station(&["Bye."]);
    let producer = rig.producer(CountingScripts::failing());
    assert_eq!(
        replenish_once(&station, &producer, &quick_policy()),
        ReplenishOutcome::Failed
    );
    assert_eq!(station.ready_count(), 0);
}

#[test]
fn background_replenisher_fills_queue() {
    let rig = Rig::new();
    let station = Arc::new(rig.station(&["Bye."]));
    let producer = Arc::new(rig.producer(CountingScripts::ok()));

    let mut handle = ReplenisherHandle::start(station.clone(), producer, quick_policy());
    assert!(handle.is_running());
    assert!(wait_until(Duration::from_secs(30), || station.ready_count() >= 3));
    handle.stop();
    assert!(!handle.is_running());

    // Never overshoots the target depth.
    assert_eq!(station.ready_count(), 3);
    let ids: Vec<u64> = station.queued().iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

// ── Weekly batch ─────────────────────────────────────────────────────────

#[test]
fn batch_replaces_block_set() {
    let rig = Rig::new();
    std::fs::create_dir_all(&rig.blocks).unwrap();
    for stale in ["block_000007.mp3", "block_000008.mp3"] {
        std::fs::write(rig.blocks.join(stale), b"old").unwrap();
    }
    std::fs::write(rig.blocks.join("keep.txt"), b"not a block").unwrap();

    let station = rig.station(&["Bye."]);
    station.continue_ids_after(8);
    let producer = rig.producer(CountingScripts::ok());
    let policy = rig.batch_policy(3);
    let now = Utc::now();

    let report = weekly::run_batch(&station, &producer, &policy, now).unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(report.produced, 3);
    assert_eq!(report.failed, 0);

    let ids: Vec<u64> = station.queued().iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(!rig.blocks.join("block_000007.mp3").exists());
    assert!(rig.blocks.join("keep.txt").exists());

    let marker = weekly::read_marker(&policy.marker_file).unwrap();
    assert_eq!(weekly::format_marker(marker), weekly::format_marker(now));
}

#[test]
fn failed_batch_writes_no_marker() {
    let rig = Rig::new();
    let station = rig.station(&["Bye."]);
    let producer = rig.producer(CountingScripts::failing());
    let policy = rig.batch_policy(2);

    let report = weekly::run_batch(&station, &producer, &policy, Utc::now()).unwrap();
    assert_eq!(report.produced, 0);
    assert_eq!(report.failed, 2);
    assert!(weekly::read_marker(&policy.marker_file).is_none());
}

#[test]
fn check_and_run_respects_marker_and_empty_queue() {
    let rig = Rig::new();
    let station = rig.station(&["Bye."]);
    let producer = rig.producer(CountingScripts::ok());
    let policy = rig.batch_policy(2);
    let now = Utc::now();

    // First boot: no marker, batch runs.
    let first = weekly::check_and_run(&station, &producer, &policy, now).unwrap();
    assert_eq!(first.map(|r| r.produced), Some(2));

    // Recent marker and blocks queued: nothing to do.
    let later = now + ChronoDuration::hours(1);
    assert!(weekly::check_and_run(&station, &producer, &policy, later)
        .unwrap()
        .is_none());

    // Queue consumed: regenerates ahead of schedule.
    while station.next().is_ready() {}
    assert_eq!(station.ready_count(), 0);
    let again = weekly::check_and_run(&station, &producer, &policy, later).unwrap();
    assert_eq!(again.map(|r| r.produced), Some(2));
    assert_eq!(station.queued()[0].id, 1);
}

// ── Configuration ────────────────────────────────────────────────────────

#[test]
fn config_file_drives_station() {
    let rig = Rig::new();
    rig.add_tracks(2);
    let path = rig.root().join("station.json");
    let json = format!(
        r#"{{ "music_dir": {:?}, "blocks_dir": {:?}, "closings": ["Only this."], "target_depth": 4 }}"#,
        rig.music, rig.blocks
    );
    std::fs::write(&path, json).unwrap();

    let (config, source) = StationConfig::resolve(Some(&path)).unwrap();
    assert_eq!(source.as_deref(), Some(path.as_path()));
    assert_eq!(config.target_depth, 4);
    assert_eq!(ReplenishPolicy::from_config(&config).target_depth, 4);

    let station = Station::from_config(&config);
    assert_eq!(station.catalog().list_tracks().len(), 2);
}
