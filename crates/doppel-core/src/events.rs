//! Internal pub/sub event bus.
//!
//! A single `tokio::sync::broadcast` topic carries every observer-facing
//! event. Subscribers are lossy by design: a slow dashboard consumer drops
//! events instead of back-pressuring the pipeline, and orderings across
//! event kinds are not guaranteed. Consumers must treat events as set
//! updates, not as a log.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{ChannelId, PauseReason};

/// Buffered events per subscriber before the oldest are dropped.
const BUS_CAPACITY: usize = 256;

/// Observer-facing event published by the pipeline and its gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PairingRequest {
        contact_key: String,
        channel: ChannelId,
        display_name: Option<String>,
        timestamp_ms: i64,
    },
    PairingApproved {
        contact_key: String,
        approved_by: String,
        tier: String,
        timestamp_ms: i64,
    },
    PauseUpdate {
        /// `None` means the global scope (`PAUSE:ALL`).
        contact_key: Option<String>,
        channel: Option<ChannelId>,
        action: PauseAction,
        reason: Option<PauseReason>,
        timestamp_ms: i64,
    },
    RateLimit {
        contact_key: String,
        current_count: i64,
        threshold: u32,
        auto_paused: bool,
        timestamp_ms: i64,
    },
    MessageReceived {
        contact_key: String,
        message_id: String,
        timestamp_ms: i64,
    },
    MessageStatus {
        contact_key: String,
        message_id: String,
        status: MessageStatus,
        error: Option<String>,
        timestamp_ms: i64,
    },
    MetricsUpdate {
        date_key: String,
        classification_tokens: i64,
        response_tokens: i64,
        cache_read_tokens: i64,
        cache_write_tokens: i64,
        total_messages: i64,
        timestamp_ms: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseAction {
    Pause,
    Resume,
}

/// Terminal delivery status surfaced in the operator activity feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Replied,
    Failed,
    Dropped,
    Paused,
    Deferred,
}

/// Cloneable handle to the broadcast bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Returns silently when no subscriber is attached.
    pub fn publish(&self, event: Event) {
        if let Err(e) = self.tx.send(event) {
            debug!(error = %e, "event published with no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ms;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::MessageReceived {
            contact_key: "telegram:1".into(),
            message_id: "m1".into(),
            timestamp_ms: now_ms(),
        });
        match rx.recv().await.unwrap() {
            Event::MessageReceived { message_id, .. } => assert_eq!(message_id, "m1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        bus.publish(Event::MessageReceived {
            contact_key: "telegram:1".into(),
            message_id: "m1".into(),
            timestamp_ms: now_ms(),
        });
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let ev = Event::RateLimit {
            contact_key: "telegram:1".into(),
            current_count: 11,
            threshold: 10,
            auto_paused: true,
            timestamp_ms: 1,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""type":"rate_limit""#));
        assert!(json.contains(r#""auto_paused":true"#));
    }
}
