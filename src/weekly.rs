//! Batch mode: regenerate the whole block set once per period.

use crate::block::is_valid_block_name;
use crate::config::StationConfig;
use crate::producer::BlockProducer;
use crate::replenish::sleep_while_running;
use crate::station::Station;
use chrono::{DateTime, Datelike, NaiveDateTime, Utc, Weekday};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Marker timestamp layout, always UTC.
pub const MARKER_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Whether a batch is due at `now`.
///
/// Never run before: due. Otherwise due once at least `period_days` have
/// passed since the last run and `now` falls on the trigger weekday.
pub fn should_run_weekly_generation(
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    trigger: Weekday,
    period_days: i64,
) -> bool {
    let Some(last_run) = last_run else {
        return true;
    };
    let elapsed = now.signed_duration_since(last_run);
    elapsed >= chrono::Duration::days(period_days) && now.weekday() == trigger
}

pub fn parse_marker(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, MARKER_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

pub fn format_marker(at: DateTime<Utc>) -> String {
    at.format(MARKER_FORMAT).to_string()
}

/// Last batch time. A missing or unparsable marker counts as never run.
pub fn read_marker(path: &Path) -> Option<DateTime<Utc>> {
    let text = fs::read_to_string(path).ok()?;
    let parsed = parse_marker(&text);
    if parsed.is_none() {
        warn!(marker = %path.display(), "ignoring unparsable generation marker");
    }
    parsed
}

pub fn write_marker(path: &Path, at: DateTime<Utc>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format_marker(at))
}

/// Delete every `block_NNNNNN.mp3` in `dir`; other files are left alone.
/// Returns how many were removed. A missing directory removes nothing.
pub fn clear_block_files(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if is_valid_block_name(&name.to_string_lossy()) && entry.path().is_file() {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub trigger: Weekday,
    pub period_days: i64,
    pub check_interval: Duration,
    pub marker_file: PathBuf,
    pub blocks_dir: PathBuf,
}

impl BatchPolicy {
    pub fn from_config(config: &StationConfig) -> Self {
        BatchPolicy {
            batch_size: config.batch_size,
            batch_delay: config.batch_delay(),
            trigger: config.trigger_weekday(),
            period_days: config.period_days,
            check_interval: config.check_interval(),
            marker_file: config.marker_file.clone(),
            blocks_dir: config.blocks_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub removed: usize,
    pub produced: usize,
    pub failed: usize,
}

/// Replace the block set: empty the queue, delete old block files, restart
/// IDs at 1 and produce `batch_size` blocks one after another. The marker
/// is written only if at least one block was produced, so a batch that
/// failed entirely is retried at the next check.
pub fn run_batch(
    station: &Station,
    producer: &BlockProducer,
    policy: &BatchPolicy,
    now: DateTime<Utc>,
) -> io::Result<BatchReport> {
    info!(size = policy.batch_size, "batch generation started");
    station.reset_for_batch();
    let removed = clear_block_files(&policy.blocks_dir)?;

    let mut produced = 0;
    let mut failed = 0;
    for i in 0..policy.batch_size {
        if i > 0 && !policy.batch_delay.is_zero() {
            thread::sleep(policy.batch_delay);
        }
        match station.produce_into_queue(producer) {
            Ok(_) => produced += 1,
            Err(e) => {
                failed += 1;
                warn!(error = %e, index = i + 1, "batch block failed");
            }
        }
    }

    if produced > 0 {
        write_marker(&policy.marker_file, now)?;
    }
    info!(removed, produced, failed, "batch generation finished");
    Ok(BatchReport {
        removed,
        produced,
        failed,
    })
}

/// Run a batch if one is due at `now`, or if the queue has run dry.
/// Returns the report when a batch ran.
pub fn check_and_run(
    station: &Station,
    producer: &BlockProducer,
    policy: &BatchPolicy,
    now: DateTime<Utc>,
) -> io::Result<Option<BatchReport>> {
    let last_run = read_marker(&policy.marker_file);
    let due = should_run_weekly_generation(now, last_run, policy.trigger, policy.period_days);
    if !due && station.ready_count() > 0 {
        return Ok(None);
    }
    if !due {
        info!("ready queue is empty, regenerating ahead of schedule");
    }
    run_batch(station, producer, policy, now).map(Some)
}

/// Background thread checking for due batches until stopped or dropped.
pub struct WeeklyHandle {
    running: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl WeeklyHandle {
    pub fn start(station: Arc<Station>, producer: Arc<BlockProducer>, policy: BatchPolicy) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::spawn(move || {
            info!(trigger = %policy.trigger, period_days = policy.period_days, "weekly scheduler started");
            while flag.load(Ordering::Relaxed) {
                if let Err(e) = check_and_run(&station, &producer, &policy, Utc::now()) {
                    error!(error = %e, "batch generation failed");
                }
                sleep_while_running(&flag, policy.check_interval);
            }
            info!("weekly scheduler stopped");
        });

        WeeklyHandle {
            running,
            thread_handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WeeklyHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn no_marker_runs() {
        assert!(should_run_weekly_generation(
            at(2024, 3, 6, 9),
            None,
            Weekday::Mon,
            7
        ));
    }

    #[test]
    fn seven_days_on_trigger_day_runs() {
        // 2024-03-04 is a Monday.
        let last = at(2024, 2, 26, 8);
        assert!(should_run_weekly_generation(
            at(2024, 3, 4, 9),
            Some(last),
            Weekday::Mon,
            7
        ));
    }

    #[test]
    fn two_days_never_runs() {
        let now = at(2024, 3, 4, 9);
        let last = at(2024, 3, 2, 9);
        for trigger in [Weekday::Mon, Weekday::Sat, Weekday::Sun] {
            assert!(!should_run_weekly_generation(now, Some(last), trigger, 7));
        }
    }

    #[test]
    fn overdue_waits_for_trigger_day() {
        let last = at(2024, 2, 20, 9);
        // Friday, ten days later.
        assert!(!should_run_weekly_generation(
            at(2024, 3, 1, 9),
            Some(last),
            Weekday::Mon,
            7
        ));
        assert!(should_run_weekly_generation(
            at(2024, 3, 4, 9),
            Some(last),
            Weekday::Mon,
            7
        ));
    }

    #[test]
    fn just_short_of_period_does_not_run() {
        let last = at(2024, 2, 26, 10);
        assert!(!should_run_weekly_generation(
            at(2024, 3, 4, 9),
            Some(last),
            Weekday::Mon,
            7
        ));
    }

    #[test]
    fn marker_format_is_utc_iso() {
        let t = at(2024, 3, 4, 9);
        assert_eq!(format_marker(t), "2024-03-04T09:00:00Z");
        assert_eq!(parse_marker("2024-03-04T09:00:00Z\n"), Some(t));
        assert_eq!(parse_marker("2024-03-04T10:00:00+01:00"), Some(t));
        assert_eq!(parse_marker("last tuesday"), None);
    }

    #[test]
    fn marker_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("marker.txt");
        assert_eq!(read_marker(&path), None);
        write_marker(&path, at(2024, 1, 1, 0)).unwrap();
        assert_eq!(read_marker(&path), Some(at(2024, 1, 1, 0)));
    }

    #[test]
    fn clear_only_removes_block_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("block_000001.mp3"), b"x").unwrap();
        fs::write(dir.path().join("block_000002.mp3"), b"x").unwrap();
        fs::write(dir.path().join("jingle.mp3"), b"x").unwrap();
        assert_eq!(clear_block_files(dir.path()).unwrap(), 2);
        assert!(dir.path().join("jingle.mp3").exists());
        assert_eq!(clear_block_files(&dir.path().join("missing")).unwrap(), 0);
    }
}
