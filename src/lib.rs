//! signal_radio: core library for the radio programme scheduler.
//!
//! Catalog scanning, track selection, block production, mixing and the
//! ready-queue cycle live here. The CLI consumes this crate.

pub mod audio;
pub mod block;
pub mod catalog;
pub mod config;
pub mod error;
pub mod http;
pub mod mixer;
pub mod player;
pub mod producer;
pub mod replenish;
pub mod script;
pub mod selector;
pub mod station;
pub mod track;
pub mod voice;
pub mod weekly;
