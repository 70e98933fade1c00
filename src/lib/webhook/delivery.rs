use std::{collections::VecDeque, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use super::{Notification, WebhookEnvelope};
use crate::{
    config::DeliveryConfig,
    error::{Result, TrackError},
};

/// A notification plus the number of delivery attempts already made.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub notification: Notification,
    pub attempts: u8,
}

/// A notification that could not be delivered.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub subscription_id: String,
    pub callback_url: String,
    pub attempts: u8,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
    pub payload: WebhookEnvelope,
}

/// Bounded in-memory log of undeliverable notifications. The oldest entry is
/// evicted once the log is full.
#[derive(Clone)]
pub struct DeadLetters {
    entries: Arc<Mutex<VecDeque<DeadLetter>>>,
    capacity: usize,
}

impl DeadLetters {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    fn record(&self, job: DeliveryJob, last_error: String) {
        let notification = job.notification;
        warn!(
            target: "paragliding.delivery",
            "giving up on notification for subscription {} after {} attempt(s): {}",
            notification.subscription_id, job.attempts, last_error
        );
        metrics::counter!("paragliding_webhook_dead_letters_total", 1);

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(DeadLetter {
            subscription_id: notification.subscription_id,
            callback_url: notification.callback_url,
            attempts: job.attempts,
            last_error,
            failed_at: Utc::now(),
            payload: notification.envelope,
        });
    }

    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Producer side of the delivery queue, held by the dispatcher.
#[derive(Clone)]
pub struct DeliveryHandle {
    sender: mpsc::Sender<DeliveryJob>,
    dead_letters: DeadLetters,
}

impl DeliveryHandle {
    /// Queues a notification without waiting. Returns `false` when the queue
    /// could not take it and the notification was dead-lettered instead.
    pub fn enqueue(&self, notification: Notification) -> bool {
        let job = DeliveryJob {
            notification,
            attempts: 0,
        };
        match self.sender.try_send(job) {
            Ok(()) => {
                metrics::counter!("paragliding_webhook_enqueued_total", 1);
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.dead_letters
                    .record(job, "delivery queue is full".to_string());
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.dead_letters
                    .record(job, "delivery queue is closed".to_string());
                false
            }
        }
    }

    pub fn dead_letters(&self) -> &DeadLetters {
        &self.dead_letters
    }
}

/// Consumer side of the delivery queue.
pub struct DeliveryReceiver {
    receiver: mpsc::Receiver<DeliveryJob>,
    retry: mpsc::WeakSender<DeliveryJob>,
    dead_letters: DeadLetters,
}

pub fn channel(config: &DeliveryConfig) -> (DeliveryHandle, DeliveryReceiver) {
    let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
    let dead_letters = DeadLetters::new(config.dead_letter_capacity);
    let retry = sender.downgrade();
    (
        DeliveryHandle {
            sender,
            dead_letters: dead_letters.clone(),
        },
        DeliveryReceiver {
            receiver,
            retry,
            dead_letters,
        },
    )
}

impl DeliveryReceiver {
    /// Starts `config.workers` tasks draining the queue. Workers exit once
    /// every [`DeliveryHandle`] has been dropped.
    pub fn spawn_workers(self, config: &DeliveryConfig) -> Result<Vec<JoinHandle<()>>> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| TrackError::Delivery(format!("failed to build HTTP client: {err}")))?;

        let receiver = Arc::new(tokio::sync::Mutex::new(self.receiver));
        let mut handles = Vec::with_capacity(config.workers);
        for worker in 0..config.workers.max(1) {
            let worker = Worker {
                id: worker,
                client: client.clone(),
                receiver: Arc::clone(&receiver),
                retry: self.retry.clone(),
                dead_letters: self.dead_letters.clone(),
                max_attempts: config.max_attempts.max(1),
                backoff_ms: config.backoff_ms,
            };
            handles.push(tokio::spawn(worker.run()));
        }
        Ok(handles)
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<DeliveryJob> {
        self.receiver.try_recv().ok()
    }
}

struct Worker {
    id: usize,
    client: reqwest::Client,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<DeliveryJob>>>,
    retry: mpsc::WeakSender<DeliveryJob>,
    dead_letters: DeadLetters,
    max_attempts: u8,
    backoff_ms: u64,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = { self.receiver.lock().await.recv().await };
            let Some(mut job) = next else {
                break;
            };
            job.attempts = job.attempts.saturating_add(1);

            match deliver(&self.client, &job.notification).await {
                Ok(()) => {
                    metrics::counter!(
                        "paragliding_webhook_deliveries_total",
                        1,
                        "outcome" => "delivered"
                    );
                }
                Err(failure) => {
                    metrics::counter!(
                        "paragliding_webhook_deliveries_total",
                        1,
                        "outcome" => "failed"
                    );
                    warn!(
                        target: "paragliding.delivery",
                        "worker {} attempt {} for subscription {} failed: {}",
                        self.id, job.attempts, job.notification.subscription_id, failure.error
                    );
                    if failure.reached_receiver || job.attempts >= self.max_attempts {
                        self.dead_letters.record(job, failure.error.to_string());
                    } else {
                        self.schedule_retry(job);
                    }
                }
            }
        }
    }

    fn schedule_retry(&self, job: DeliveryJob) {
        let delay = backoff_delay(self.backoff_ms, job.attempts);
        let retry = self.retry.clone();
        let dead_letters = self.dead_letters.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(sender) = retry.upgrade() else {
                dead_letters.record(job, "delivery queue shut down before retry".to_string());
                return;
            };
            if let Err(err) = sender.try_send(job) {
                let job = match err {
                    mpsc::error::TrySendError::Full(job)
                    | mpsc::error::TrySendError::Closed(job) => job,
                };
                dead_letters.record(job, "delivery queue rejected retry".to_string());
            }
        });
    }
}

/// A failed attempt. Once the receiver may have seen the request the
/// notification is never sent again, so each crossing is delivered at most once.
struct DeliveryFailure {
    error: TrackError,
    reached_receiver: bool,
}

async fn deliver(
    client: &reqwest::Client,
    notification: &Notification,
) -> std::result::Result<(), DeliveryFailure> {
    let response = client
        .post(&notification.callback_url)
        .json(&notification.envelope)
        .send()
        .await
        .map_err(|err| DeliveryFailure {
            reached_receiver: !err.is_connect(),
            error: TrackError::Delivery(format!("{}: {}", notification.callback_url, err)),
        })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(DeliveryFailure {
            reached_receiver: true,
            error: TrackError::Delivery(format!(
                "{} responded with {}: {}",
                notification.callback_url, status, body
            )),
        });
    }

    info!(
        target: "paragliding.delivery",
        "delivered {} track id(s) to subscription {} ({}): {}",
        notification.envelope.text.tracks.len(),
        notification.subscription_id,
        status,
        body
    );
    Ok(())
}

/// Delay before the retry following attempt number `attempts`.
pub fn backoff_delay(base_ms: u64, attempts: u8) -> Duration {
    let factor = match attempts {
        0 | 1 => 1,
        2 => 2,
        3 => 4,
        _ => 10,
    };
    Duration::from_millis(base_ms.saturating_mul(factor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{marker::Marker, webhook::WebhookMessage};
    use axum::{Router, extract::State, http::StatusCode, routing::post};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn notification(id: &str, url: &str) -> Notification {
        Notification {
            subscription_id: id.to_string(),
            callback_url: url.to_string(),
            envelope: WebhookEnvelope {
                text: WebhookMessage {
                    t_latest: Marker::from_u64(1),
                    tracks: vec!["igc1".into()],
                    processing: 0,
                },
            },
        }
    }

    #[test]
    fn backoff_grows_then_caps() {
        assert_eq!(backoff_delay(100, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(100, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(100, 9), Duration::from_millis(1_000));
    }

    #[test]
    fn full_queue_dead_letters_instead_of_blocking() {
        let config = DeliveryConfig {
            queue_capacity: 1,
            ..DeliveryConfig::default()
        };
        let (handle, mut receiver) = channel(&config);

        assert!(handle.enqueue(notification("1", "http://localhost/a")));
        assert!(!handle.enqueue(notification("2", "http://localhost/b")));

        let letters = handle.dead_letters().snapshot();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].subscription_id, "2");
        assert_eq!(letters[0].attempts, 0);
        assert_eq!(
            receiver.try_recv().map(|job| job.notification.subscription_id),
            Some("1".to_string())
        );
    }

    #[test]
    fn dead_letter_log_evicts_oldest() {
        let letters = DeadLetters::new(2);
        for id in ["1", "2", "3"] {
            letters.record(
                DeliveryJob {
                    notification: notification(id, "http://localhost"),
                    attempts: 3,
                },
                "boom".into(),
            );
        }
        let ids: Vec<_> = letters
            .snapshot()
            .into_iter()
            .map(|letter| letter.subscription_id)
            .collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_receiver_ends_in_dead_letters() {
        let config = DeliveryConfig {
            timeout_ms: 500,
            workers: 1,
            max_attempts: 2,
            backoff_ms: 10,
            ..DeliveryConfig::default()
        };
        let (handle, receiver) = channel(&config);
        receiver.spawn_workers(&config).expect("spawn workers");

        assert!(handle.enqueue(notification("7", "http://127.0.0.1:1/hook")));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while handle.dead_letters().is_empty() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "notification was never dead-lettered"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let letter = &handle.dead_letters().snapshot()[0];
        assert_eq!(letter.subscription_id, "7");
        assert_eq!(letter.attempts, 2);
    }

    async fn slow_hook(State(hits): State<Arc<AtomicUsize>>) -> &'static str {
        hits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(800)).await;
        "late"
    }

    async fn failing_hook(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
        hits.fetch_add(1, Ordering::SeqCst);
        StatusCode::INTERNAL_SERVER_ERROR
    }

    async fn spawn_hooks(hits: Arc<AtomicUsize>) -> String {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind hook listener");
        let base = format!("http://{}", listener.local_addr().expect("hook address"));
        let app = Router::new()
            .route("/slow", post(slow_hook))
            .route("/failing", post(failing_hook))
            .with_state(hits);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        base
    }

    async fn wait_for_dead_letters(handle: &DeliveryHandle, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while handle.dead_letters().len() < expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {expected} dead letter(s)"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn requests_that_reached_the_receiver_are_not_repeated() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_hooks(Arc::clone(&hits)).await;
        let config = DeliveryConfig {
            timeout_ms: 200,
            backoff_ms: 10,
            ..DeliveryConfig::default()
        };
        assert!(config.max_attempts > 1);
        let (handle, receiver) = channel(&config);
        receiver.spawn_workers(&config).expect("spawn workers");

        assert!(handle.enqueue(notification("1", &format!("{base}/slow"))));
        assert!(handle.enqueue(notification("2", &format!("{base}/failing"))));
        wait_for_dead_letters(&handle, 2).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let letters = handle.dead_letters().snapshot();
        assert_eq!(letters.len(), 2);
        assert!(letters.iter().all(|letter| letter.attempts == 1));
    }
}
