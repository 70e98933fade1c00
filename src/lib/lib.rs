//! Paragliding track ticker.
//!
//! Ingests IGC flight logs, numbers them in arrival order, serves windowed
//! "ticker" views over the sequence and notifies webhook subscribers once
//! enough new tracks have accumulated.

pub mod config;
pub mod error;
pub mod igc;
pub mod marker;
pub mod observability;
pub mod sequencer;
pub mod server;
pub mod service;
pub mod store;
pub mod ticker;
pub mod track;
pub mod uptime;
pub mod webhook;
