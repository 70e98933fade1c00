//! New-track webhooks: subscriptions, threshold detection and delivery.

mod delivery;
mod dispatch;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TrackError},
    marker::Marker,
};

pub use delivery::{
    DeadLetter, DeadLetters, DeliveryHandle, DeliveryJob, DeliveryReceiver, backoff_delay,
    channel,
};
pub use dispatch::Dispatcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(rename = "webhookURL")]
    pub callback_url: String,
    #[serde(rename = "minTriggerValue")]
    pub trigger_count: u64,
    /// Track count at creation or at the last notification.
    pub watermark: u64,
}

impl Subscription {
    /// Whether enough tracks arrived since the watermark for `head`.
    pub fn is_due(&self, head: u64) -> bool {
        head.saturating_sub(self.watermark) >= self.trigger_count
    }

    fn numeric_id(&self) -> u64 {
        self.id.parse().unwrap_or(u64::MAX)
    }
}

/// Body of a subscribe request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscription {
    #[serde(rename = "webhookURL")]
    pub callback_url: String,
    #[serde(rename = "minTriggerValue", default)]
    pub trigger_count: Option<u64>,
}

impl NewSubscription {
    pub fn parse(body: &str) -> Result<Self> {
        let request: NewSubscription = serde_json::from_str(body)
            .map_err(|err| TrackError::MalformedInput(format!("invalid webhook request: {err}")))?;
        let url = reqwest::Url::parse(request.callback_url.trim()).map_err(|err| {
            TrackError::MalformedInput(format!("invalid webhookURL: {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TrackError::MalformedInput(
                "webhookURL must use http or https".to_string(),
            ));
        }
        Ok(request)
    }

    /// Trigger count with the zero/absent case coerced to one.
    pub fn effective_trigger(&self) -> u64 {
        self.trigger_count.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub t_latest: Marker,
    pub tracks: Vec<String>,
    pub processing: u64,
}

/// Outbound payload shape expected by chat-style webhook receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub text: WebhookMessage,
}

/// A notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subscription_id: String,
    pub callback_url: String,
    pub envelope: WebhookEnvelope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_or_missing_trigger_becomes_one() {
        let zero = NewSubscription::parse(
            r#"{"webhookURL":"http://localhost/hook","minTriggerValue":0}"#,
        )
        .unwrap();
        assert_eq!(zero.effective_trigger(), 1);

        let missing = NewSubscription::parse(r#"{"webhookURL":"https://example.com/x"}"#).unwrap();
        assert_eq!(missing.effective_trigger(), 1);

        let three = NewSubscription::parse(
            r#"{"webhookURL":"https://example.com/x","minTriggerValue":3}"#,
        )
        .unwrap();
        assert_eq!(three.effective_trigger(), 3);
    }

    #[test]
    fn rejects_unusable_callback_urls() {
        for body in [
            r#"{"webhookURL":"not a url"}"#,
            r#"{"webhookURL":"ftp://example.com/hook"}"#,
            r#"{"minTriggerValue":2}"#,
            r#"{"webhookURL":"http://x","minTriggerValue":-1}"#,
        ] {
            let err = NewSubscription::parse(body).unwrap_err();
            assert!(matches!(err, TrackError::MalformedInput(_)), "{body}");
        }
    }

    #[test]
    fn due_once_trigger_count_tracks_accumulate() {
        let subscription = Subscription {
            id: "1".into(),
            callback_url: "http://localhost".into(),
            trigger_count: 3,
            watermark: 2,
        };
        assert!(!subscription.is_due(4));
        assert!(subscription.is_due(5));
        assert!(subscription.is_due(9));
    }

    #[test]
    fn subscription_json_uses_public_field_names() {
        let subscription = Subscription {
            id: "4".into(),
            callback_url: "http://localhost/hook".into(),
            trigger_count: 2,
            watermark: 7,
        };
        let value = serde_json::to_value(&subscription).unwrap();
        assert_eq!(value["webhookURL"], "http://localhost/hook");
        assert_eq!(value["minTriggerValue"], 2);
        assert_eq!(value["watermark"], 7);
    }
}
