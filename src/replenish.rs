//! Continuous replenishment: keeps the ready queue near its target depth.

use crate::producer::BlockProducer;
use crate::station::Station;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Queue depths and pacing for the replenishment loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplenishPolicy {
    /// Below this depth the next attempt follows quickly.
    pub min_depth: usize,
    /// Production stops once the queue holds this many blocks.
    pub target_depth: usize,
    pub refill_interval: Duration,
    pub idle_interval: Duration,
    pub failure_backoff: Duration,
}

impl Default for ReplenishPolicy {
    fn default() -> Self {
        ReplenishPolicy {
            min_depth: 2,
            target_depth: 3,
            refill_interval: Duration::from_secs(2),
            idle_interval: Duration::from_secs(30),
            failure_backoff: Duration::from_secs(60),
        }
    }
}

impl ReplenishPolicy {
    pub fn from_config(config: &crate::config::StationConfig) -> Self {
        ReplenishPolicy {
            min_depth: config.min_depth,
            target_depth: config.target_depth,
            refill_interval: config.refill_interval(),
            idle_interval: config.idle_interval(),
            failure_backoff: config.failure_backoff(),
        }
    }

    /// How long to wait after `outcome`. Below the low-water mark the next
    /// attempt follows after the short refill interval; above it the queue
    /// is topped up at the idle pace.
    pub fn delay_after(&self, outcome: &ReplenishOutcome) -> Duration {
        match outcome {
            ReplenishOutcome::Produced { depth } if *depth < self.min_depth => {
                self.refill_interval
            }
            ReplenishOutcome::Produced { .. } | ReplenishOutcome::Full { .. } => {
                self.idle_interval
            }
            ReplenishOutcome::Failed => self.failure_backoff,
        }
    }
}

/// Result of one replenishment attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplenishOutcome {
    /// Queue already at target depth; nothing produced.
    Full { depth: usize },
    /// A block was produced; `depth` is the queue length afterwards.
    Produced { depth: usize },
    /// Production failed; the error has been logged.
    Failed,
}

/// One step of the loop: produce a block if the queue is below target.
/// Producer failures are logged and reported, never propagated.
pub fn replenish_once(
    station: &Station,
    producer: &BlockProducer,
    policy: &ReplenishPolicy,
) -> ReplenishOutcome {
    let depth = station.ready_count();
    if depth >= policy.target_depth {
        return ReplenishOutcome::Full { depth };
    }
    match station.produce_into_queue(producer) {
        Ok(_) => ReplenishOutcome::Produced {
            depth: station.ready_count(),
        },
        Err(e) => {
            warn!(error = %e, "block production failed, backing off");
            ReplenishOutcome::Failed
        }
    }
}

/// Sleep for `duration` unless `running` is cleared first.
pub(crate) fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Background thread running the replenishment loop until stopped or
/// dropped.
pub struct ReplenisherHandle {
    running: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl ReplenisherHandle {
    pub fn start(
        station: Arc<Station>,
        producer: Arc<BlockProducer>,
        policy: ReplenishPolicy,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::spawn(move || {
            info!(
                min_depth = policy.min_depth,
                target_depth = policy.target_depth,
                "replenisher started"
            );
            while flag.load(Ordering::Relaxed) {
                let outcome = replenish_once(&station, &producer, &policy);
                sleep_while_running(&flag, policy.delay_after(&outcome));
            }
            info!("replenisher stopped");
        });

        ReplenisherHandle {
            running,
            thread_handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for the thread. An in-flight production
    /// finishes first.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReplenisherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
