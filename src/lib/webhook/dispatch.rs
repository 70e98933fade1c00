use std::{sync::Arc, time::Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{DeliveryHandle, Notification, Subscription, WebhookEnvelope, WebhookMessage};
use crate::{
    error::Result,
    sequencer::Sequencer,
    store::{SubscriptionStore, TrackStore},
    track::{Track, resolve_position},
    uptime::elapsed_ms,
};

/// Decides after each ingestion which subscriptions are due and queues their
/// notifications.
pub struct Dispatcher {
    subscriptions: SubscriptionStore,
    tracks: TrackStore,
    sequencer: Arc<Sequencer>,
    delivery: DeliveryHandle,
    scan_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        subscriptions: SubscriptionStore,
        tracks: TrackStore,
        sequencer: Arc<Sequencer>,
        delivery: DeliveryHandle,
    ) -> Self {
        Self {
            subscriptions,
            tracks,
            sequencer,
            delivery,
            scan_lock: Mutex::new(()),
        }
    }

    pub fn delivery(&self) -> &DeliveryHandle {
        &self.delivery
    }

    /// Removes a subscription. Runs under the scan lock so an in-flight scan
    /// cannot write the subscription back after it is gone.
    pub fn unsubscribe(&self, id: &str) -> Result<Option<Subscription>> {
        let _scan = self.scan_lock.lock();
        let Some(subscription) = self.subscriptions.find(id)? else {
            return Ok(None);
        };
        if !self.subscriptions.remove(id)? {
            return Ok(None);
        }
        Ok(Some(subscription))
    }

    /// Scans every subscription against the current head. `started` is when
    /// the triggering request began and feeds the `processing` field. Returns
    /// how many notifications were produced.
    pub fn on_ingest(&self, started: Instant) -> Result<usize> {
        let _scan = self.scan_lock.lock();
        let head = self.sequencer.total();
        let floor = self.sequencer.removed_offset();

        let mut subscriptions = self.subscriptions.documents()?;
        subscriptions.sort_by_key(Subscription::numeric_id);

        let mut fired = 0;
        for mut subscription in subscriptions {
            if !subscription.is_due(head) {
                continue;
            }
            // The snapshot may be stale; never resurrect a removed subscription.
            if self.subscriptions.find(&subscription.id)?.is_none() {
                debug!(
                    target: "paragliding.webhook",
                    "subscription {} removed during scan", subscription.id
                );
                continue;
            }

            let from = subscription.watermark.max(floor) + 1;
            let resolved: Vec<Track> = (from..=head)
                .filter_map(|position| resolve_position(self.tracks.as_ref(), position))
                .collect();

            subscription.watermark = head;
            if let Err(err) = self.subscriptions.insert(&subscription.id, &subscription) {
                warn!(
                    target: "paragliding.webhook",
                    "skipping subscription {}: failed to advance watermark: {}",
                    subscription.id, err
                );
                continue;
            }

            let Some(t_latest) = resolved.last().map(|track| track.timestamp) else {
                debug!(
                    target: "paragliding.webhook",
                    "subscription {} due at {} but its tracks were cleared", subscription.id, head
                );
                continue;
            };
            let tracks: Vec<String> = resolved.into_iter().map(|track| track.id).collect();
            debug!(
                target: "paragliding.webhook",
                "subscription {} due at {}: {} track(s)",
                subscription.id,
                head,
                tracks.len()
            );
            self.delivery.enqueue(Notification {
                subscription_id: subscription.id,
                callback_url: subscription.callback_url,
                envelope: WebhookEnvelope {
                    text: WebhookMessage {
                        t_latest,
                        tracks,
                        processing: elapsed_ms(started.elapsed()),
                    },
                },
            });
            metrics::counter!("paragliding_notifications_dispatched_total", 1);
            fired += 1;
        }
        Ok(fired)
    }
}
