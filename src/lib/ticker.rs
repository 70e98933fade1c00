//! Windowed views over the track sequence.

use serde::Serialize;

use crate::{
    marker::Marker,
    store::TrackStore,
    track::resolve_position,
};

/// Ordered slice of track ids and the insertion markers bounding it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Window {
    pub tracks: Vec<String>,
    pub first: Option<Marker>,
    pub last: Option<Marker>,
}

/// Ticker response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticker {
    pub t_latest: Marker,
    pub t_start: Option<Marker>,
    pub t_stop: Option<Marker>,
    pub tracks: Vec<String>,
    /// Milliseconds spent building the response.
    pub processing: u64,
}

impl Ticker {
    pub fn new(latest: Marker, window: Window, processing: u64) -> Self {
        Self {
            t_latest: latest,
            t_start: window.first,
            t_stop: window.last,
            tracks: window.tracks,
            processing,
        }
    }
}

#[derive(Clone)]
pub struct WindowEngine {
    tracks: TrackStore,
}

impl WindowEngine {
    pub fn new(tracks: TrackStore) -> Self {
        Self { tracks }
    }

    /// Walks positions `start..=start + size`, stopping at the first position
    /// that does not resolve. A window of size `n` holds up to `n + 1` ids.
    pub fn window(&self, start: u64, size: usize) -> Window {
        let mut window = Window::default();
        let end = start.saturating_add(size as u64);
        for position in start..=end {
            let Some(track) = resolve_position(self.tracks.as_ref(), position) else {
                break;
            };
            if window.first.is_none() {
                window.first = Some(track.timestamp);
            }
            window.last = Some(track.timestamp);
            window.tracks.push(track.id);
        }
        window
    }

    /// Linear scan over `from..=head` for the first track inserted after
    /// `marker`. Unresolvable positions are skipped.
    pub fn position_after(&self, from: u64, head: u64, marker: Marker) -> Option<u64> {
        (from..=head).find(|position| {
            resolve_position(self.tracks.as_ref(), *position)
                .map(|track| track.timestamp > marker)
                .unwrap_or(false)
        })
    }
}
