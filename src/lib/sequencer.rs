//! Track numbering.
//!
//! The sequencer hands out the storage key of every new track (`igc1`,
//! `igc2`, ...), mints its insertion marker, and remembers the low-water mark
//! left behind by a bulk clear. Keys are never reused: clearing the store
//! moves the low-water mark up instead of resetting the counter.

use std::{fs, path::PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{Result, TrackError},
    marker::{Marker, MarkerClock},
    store::DocumentStore,
    track::Track,
};

pub const KEY_PREFIX: &str = "igc";

pub fn track_key(position: u64) -> String {
    format!("{KEY_PREFIX}{position}")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    /// Number of track keys handed out since the sequence began.
    pub issued: u64,
    /// Every position up to and including this one has been cleared.
    pub removed_offset: u64,
    pub subscriptions_issued: u64,
    #[serde(default)]
    pub last_marker: Marker,
}

/// Key and marker reserved for the track being ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub position: u64,
    pub key: String,
    pub marker: Marker,
}

pub struct Sequencer {
    inner: Mutex<Inner>,
    journal: Option<PathBuf>,
}

struct Inner {
    state: SequenceState,
    clock: MarkerClock,
}

impl Sequencer {
    /// Sequencer whose state lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SequenceState::default(),
                clock: MarkerClock::new(),
            }),
            journal: None,
        }
    }

    /// Sequencer that records every state change to `path` and resumes from it.
    pub fn with_journal(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let state: SequenceState = serde_json::from_str(&contents)?;
            info!(
                "resuming track sequence at {} (removed offset {})",
                state.issued, state.removed_offset
            );
            state
        } else {
            SequenceState::default()
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                state,
                clock: MarkerClock::resume(state.last_marker),
            }),
            journal: Some(path),
        })
    }

    /// Reserves the next key and runs `persist` with it while holding the
    /// sequence lock. The counter only advances when `persist` succeeds.
    pub fn next_key<F, T>(&self, persist: F) -> Result<T>
    where
        F: FnOnce(&Assignment) -> Result<T>,
    {
        let mut inner = self.inner.lock();
        let position = inner.state.issued + 1;
        let marker = inner.clock.next_marker();
        let assignment = Assignment {
            position,
            key: track_key(position),
            marker,
        };

        let mut next = inner.state;
        next.issued = position;
        next.last_marker = marker;
        self.write_journal(&next)?;

        let output = persist(&assignment)?;
        inner.state = next;
        Ok(output)
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().state.issued
    }

    pub fn removed_offset(&self) -> u64 {
        self.inner.lock().state.removed_offset
    }

    /// First position that can still resolve to a stored track.
    pub fn first_visible(&self) -> u64 {
        self.removed_offset() + 1
    }

    pub fn snapshot(&self) -> SequenceState {
        self.inner.lock().state
    }

    /// Clears the track store and raises the low-water mark to the current
    /// head. Returns how many tracks were removed.
    pub fn clear_all(&self, tracks: &dyn DocumentStore<Track>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let removed = tracks.remove_all()?;
        let mut next = inner.state;
        next.removed_offset = next.issued;
        self.write_journal(&next)?;
        inner.state = next;
        info!(
            "cleared {removed} tracks; numbering continues after {}",
            track_key(next.issued)
        );
        Ok(removed)
    }

    pub fn next_subscription_id(&self) -> Result<String> {
        let mut inner = self.inner.lock();
        let mut next = inner.state;
        next.subscriptions_issued += 1;
        self.write_journal(&next)?;
        inner.state = next;
        Ok(next.subscriptions_issued.to_string())
    }

    fn write_journal(&self, state: &SequenceState) -> Result<()> {
        let Some(path) = self.journal.as_ref() else {
            return Ok(());
        };
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(state)?).map_err(|err| {
            TrackError::Storage(format!(
                "failed to write sequence journal {}: {}",
                staging.display(),
                err
            ))
        })?;
        fs::rename(&staging, path).map_err(|err| {
            TrackError::Storage(format!(
                "failed to replace sequence journal {}: {}",
                path.display(),
                err
            ))
        })?;
        Ok(())
    }
}
