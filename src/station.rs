//! Ready queue and programme cycle.
//!
//! The cycle alternates one news block with two music tracks. All mutable
//! scheduling state sits in one [`SchedulerState`] behind a single mutex that
//! is held only while that state is mutated; catalog scans, synthesis and
//! disk writes happen outside it.

use crate::block::{self, Block, ClosingRotation};
use crate::catalog::TrackCatalog;
use crate::config::StationConfig;
use crate::error::ProducerError;
use crate::producer::BlockProducer;
use crate::selector::TrackSelector;
use crate::track::Track;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Positions in the cycle: 0 is news, 1 and 2 are music.
const CYCLE_LENGTH: u64 = 3;

/// What a consumer should play next.
#[derive(Debug, Clone, PartialEq)]
pub enum NextItem {
    News(Block),
    Music(Track),
    NotReady(NotReady),
}

/// Why nothing could be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReady {
    /// News turn and no block is ready yet.
    QueueEmpty,
    /// Music turn with an empty catalog and no block to fall back on.
    NothingToPlay,
}

impl NotReady {
    pub fn message(self) -> &'static str {
        match self {
            NotReady::QueueEmpty => "preparing the first block",
            NotReady::NothingToPlay => "no music in the catalog and no block ready",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    News,
    Music,
}

/// Wire form of [`NextItem`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,
    /// Block or track file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NextItem {
    pub fn is_ready(&self) -> bool {
        !matches!(self, NextItem::NotReady(_))
    }

    pub fn to_response(&self) -> NextResponse {
        match self {
            NextItem::News(block) => NextResponse {
                ready: true,
                kind: Some(ItemKind::News),
                reference: Some(block.name.clone()),
                message: None,
            },
            NextItem::Music(track) => NextResponse {
                ready: true,
                kind: Some(ItemKind::Music),
                reference: Some(track.name.clone()),
                message: None,
            },
            NextItem::NotReady(reason) => NextResponse {
                ready: false,
                kind: None,
                reference: None,
                message: Some(reason.message().to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub ready_count: usize,
    pub can_play: bool,
}

struct SchedulerState {
    queue: VecDeque<Block>,
    cycle_index: u64,
    selector: TrackSelector,
    /// Last allocated block ID; the next block gets the one after it.
    last_block_id: u64,
    closings: ClosingRotation,
}

pub struct Station {
    state: Mutex<SchedulerState>,
    catalog: TrackCatalog,
    /// Serializes block production so IDs and closings follow file order.
    production: Mutex<()>,
}

impl Station {
    pub fn new(catalog: TrackCatalog, rng: fastrand::Rng, closings: Vec<String>) -> Self {
        Station {
            state: Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                cycle_index: 0,
                selector: TrackSelector::new(catalog.clone(), rng),
                last_block_id: 0,
                closings: ClosingRotation::new(closings),
            }),
            catalog,
            production: Mutex::new(()),
        }
    }

    pub fn from_config(config: &StationConfig) -> Self {
        let catalog = TrackCatalog::new(
            config.music_dir.clone(),
            config.fallback_music_dir.clone(),
        );
        Station::new(catalog, fastrand::Rng::new(), config.closings.clone())
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn catalog(&self) -> &TrackCatalog {
        &self.catalog
    }

    /// Hand out the next programme item. Never blocks on production.
    ///
    /// The cycle index advances by exactly one for every item handed out
    /// and stays put when nothing is ready. On a music turn with no music,
    /// a ready block is played instead.
    pub fn next(&self) -> NextItem {
        loop {
            let observed = {
                let mut state = self.lock();
                if state.cycle_index % CYCLE_LENGTH == 0 {
                    return match state.queue.pop_front() {
                        Some(block) => {
                            state.cycle_index += 1;
                            NextItem::News(block)
                        }
                        None => NextItem::NotReady(NotReady::QueueEmpty),
                    };
                }
                state.cycle_index
            };

            let tracks = self.catalog.list_tracks();

            let mut state = self.lock();
            if state.cycle_index != observed {
                // Another consumer took this turn while we scanned.
                continue;
            }
            if let Some(track) = state.selector.select_from(&tracks) {
                state.cycle_index += 1;
                return NextItem::Music(track);
            }
            return match state.queue.pop_front() {
                Some(block) => {
                    debug!(block = %block.name, "no music, playing a block instead");
                    state.cycle_index += 1;
                    NextItem::News(block)
                }
                None => NextItem::NotReady(NotReady::NothingToPlay),
            };
        }
    }

    pub fn status(&self) -> Status {
        let ready_count = self.lock().queue.len();
        Status {
            ready_count,
            can_play: ready_count > 0,
        }
    }

    pub fn ready_count(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn cycle_index(&self) -> u64 {
        self.lock().cycle_index
    }

    /// Snapshot of the ready queue, front first.
    pub fn queued(&self) -> Vec<Block> {
        self.lock().queue.iter().cloned().collect()
    }

    /// Append a fully written block.
    pub fn push_ready(&self, block: Block) {
        self.lock().queue.push_back(block);
    }

    /// Continue numbering after `last_id`, so blocks left on disk by an
    /// earlier run are not overwritten. Never moves the counter backwards.
    pub fn continue_ids_after(&self, last_id: u64) {
        let mut state = self.lock();
        state.last_block_id = state.last_block_id.max(last_id);
    }

    fn allocate_block_id(&self) -> u64 {
        let mut state = self.lock();
        state.last_block_id = block::next_block_id(state.last_block_id);
        state.last_block_id
    }

    /// Produce one block with the current closing phrase and queue it.
    /// The closing rotation moves on only when the block was produced.
    pub fn produce_into_queue(&self, producer: &BlockProducer) -> Result<Block, ProducerError> {
        let _producing = self.production.lock().unwrap_or_else(PoisonError::into_inner);
        let closing = self.lock().closings.current();

        let block = producer.produce_block(&closing, producer.bed_available(), || {
            self.allocate_block_id()
        })?;

        let depth = {
            let mut state = self.lock();
            state.closings.advance();
            state.queue.push_back(block.clone());
            state.queue.len()
        };
        info!(block = %block.name, depth, "block queued");
        Ok(block)
    }

    /// Empty the ready queue and restart block IDs at 1. The cycle index
    /// and playback history are kept. Returns the blocks that were queued.
    pub fn reset_for_batch(&self) -> Vec<Block> {
        let mut state = self.lock();
        state.last_block_id = 0;
        state.queue.drain(..).collect()
    }
}
