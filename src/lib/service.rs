use std::{sync::Arc, time::Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::{Config, StorageBackend},
    error::{Result, TrackError},
    igc::{IgcDecoder, TrackDecoder},
    marker::Marker,
    sequencer::Sequencer,
    store::Stores,
    ticker::{Ticker, Window, WindowEngine},
    track::{Track, TrackField, resolve_position},
    uptime::{elapsed_ms, iso8601_duration},
    webhook::{DeadLetter, DeliveryHandle, Dispatcher, NewSubscription, Subscription},
};

pub const SERVICE_INFO: &str = "Service for Paragliding tracks.";
pub const SERVICE_VERSION: &str = "v1";

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub uptime: String,
    pub info: &'static str,
    pub version: &'static str,
}

/// Every track and webhook operation exposed over HTTP. Methods block on
/// storage and are meant to run off the async executor.
pub struct TrackService {
    stores: Stores,
    sequencer: Arc<Sequencer>,
    windows: WindowEngine,
    dispatcher: Dispatcher,
    decoder: Arc<dyn TrackDecoder>,
    ticker_cap: usize,
    started_at: Instant,
}

impl TrackService {
    pub fn new(
        stores: Stores,
        sequencer: Arc<Sequencer>,
        decoder: Arc<dyn TrackDecoder>,
        delivery: DeliveryHandle,
        ticker_cap: usize,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::clone(&stores.subscriptions),
            Arc::clone(&stores.tracks),
            Arc::clone(&sequencer),
            delivery,
        );
        Self {
            windows: WindowEngine::new(Arc::clone(&stores.tracks)),
            stores,
            sequencer,
            dispatcher,
            decoder,
            ticker_cap: ticker_cap.max(1),
            started_at: Instant::now(),
        }
    }

    /// Opens the configured backend. Only the RocksDB backend journals the
    /// sequence, since in-memory tracks do not outlive the process either.
    pub fn open(config: &Config, delivery: DeliveryHandle) -> Result<Self> {
        let stores = Stores::open(config)?;
        let sequencer = match config.storage {
            StorageBackend::Memory => Sequencer::in_memory(),
            StorageBackend::Rocksdb => Sequencer::with_journal(config.sequence_journal_path())?,
        };
        Ok(Self::new(
            stores,
            Arc::new(sequencer),
            Arc::new(IgcDecoder),
            delivery,
            config.ticker_cap,
        ))
    }

    pub fn metadata(&self) -> ServiceInfo {
        ServiceInfo {
            uptime: iso8601_duration(self.started_at.elapsed()),
            info: SERVICE_INFO,
            version: SERVICE_VERSION,
        }
    }

    /// Decodes a JSON-string body holding raw IGC content and stores it as the
    /// next track. Returns the new track id.
    pub fn ingest(&self, body: &str) -> Result<String> {
        let started = Instant::now();
        let source: String = serde_json::from_str(body).map_err(|err| {
            TrackError::MalformedInput(format!("body must be a JSON string: {err}"))
        })?;
        let log = self.decoder.decode(&source)?;

        let tracks = Arc::clone(&self.stores.tracks);
        let id = self.sequencer.next_key(|assignment| {
            let track = Track::from_log(
                assignment.key.clone(),
                assignment.marker,
                &log,
                source,
                Utc::now(),
            );
            tracks.insert(&assignment.key, &track)?;
            Ok(track.id)
        })?;
        metrics::counter!("paragliding_tracks_ingested_total", 1);
        info!("ingested track {id}");

        if let Err(err) = self.dispatcher.on_ingest(started) {
            warn!(
                target: "paragliding.webhook",
                "webhook scan after {id} failed: {err}"
            );
        }
        Ok(id)
    }

    /// Ids of every live track, oldest first.
    pub fn track_ids(&self) -> Vec<String> {
        (self.sequencer.first_visible()..=self.sequencer.total())
            .filter_map(|position| resolve_position(self.stores.tracks.as_ref(), position))
            .map(|track| track.id)
            .collect()
    }

    pub fn track(&self, id: &str) -> Result<Track> {
        match self.stores.tracks.find(id) {
            Ok(Some(track)) => Ok(track),
            Ok(None) => Err(TrackError::NotFound(format!("track {id}"))),
            Err(err) => {
                warn!(target: "paragliding.store", "failed to load track {id}: {err}");
                Err(TrackError::NotFound(format!("track {id}")))
            }
        }
    }

    pub fn track_field(&self, id: &str, field: TrackField) -> Result<String> {
        Ok(self.track(id)?.field(field))
    }

    /// Marker of the most recently ingested track.
    pub fn latest_marker(&self) -> Result<Marker> {
        resolve_position(self.stores.tracks.as_ref(), self.sequencer.total())
            .map(|track| track.timestamp)
            .ok_or(TrackError::NoTracks)
    }

    /// Window starting at the oldest live track.
    pub fn ticker(&self) -> Result<Ticker> {
        let started = Instant::now();
        let latest = self.latest_marker()?;
        let window = self
            .windows
            .window(self.sequencer.first_visible(), self.ticker_cap);
        Ok(Ticker::new(latest, window, elapsed_ms(started.elapsed())))
    }

    /// Window starting at the first track inserted after `marker`.
    pub fn ticker_after(&self, marker: &str) -> Result<Ticker> {
        let started = Instant::now();
        let marker: Marker = marker
            .parse()
            .map_err(|err| TrackError::MalformedInput(format!("invalid marker '{marker}': {err}")))?;
        let latest = self.latest_marker()?;
        let window = self
            .windows
            .position_after(self.sequencer.first_visible(), self.sequencer.total(), marker)
            .map(|start| self.windows.window(start, self.ticker_cap))
            .unwrap_or_else(Window::default);
        Ok(Ticker::new(latest, window, elapsed_ms(started.elapsed())))
    }

    /// Registers a webhook and returns its id. The subscription counts tracks
    /// from the current total onwards.
    pub fn subscribe(&self, body: &str) -> Result<String> {
        let request = NewSubscription::parse(body)?;
        let id = self.sequencer.next_subscription_id()?;
        let subscription = Subscription {
            id: id.clone(),
            callback_url: request.callback_url.trim().to_string(),
            trigger_count: request.effective_trigger(),
            watermark: self.sequencer.total(),
        };
        self.stores.subscriptions.insert(&id, &subscription)?;
        info!(
            target: "paragliding.webhook",
            "registered webhook {} -> {} (every {} track(s))",
            id, subscription.callback_url, subscription.trigger_count
        );
        Ok(id)
    }

    pub fn subscription(&self, id: &str) -> Result<Subscription> {
        match self.stores.subscriptions.find(id) {
            Ok(Some(subscription)) => Ok(subscription),
            Ok(None) => Err(TrackError::NotFound(format!("webhook {id}"))),
            Err(err) => {
                warn!(target: "paragliding.store", "failed to load webhook {id}: {err}");
                Err(TrackError::NotFound(format!("webhook {id}")))
            }
        }
    }

    /// Removes the webhook and returns what was stored.
    pub fn unsubscribe(&self, id: &str) -> Result<Subscription> {
        let subscription = self
            .dispatcher
            .unsubscribe(id)?
            .ok_or_else(|| TrackError::NotFound(format!("webhook {id}")))?;
        info!(target: "paragliding.webhook", "removed webhook {id}");
        Ok(subscription)
    }

    pub fn track_count(&self) -> Result<usize> {
        self.stores.tracks.count()
    }

    pub fn clear_tracks(&self) -> Result<usize> {
        self.sequencer.clear_all(self.stores.tracks.as_ref())
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dispatcher.delivery().dead_letters().snapshot()
    }
}
