use serde::{Deserialize, Serialize};

use doppel_core::types::{ChannelId, NormalizedMessage};

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Fully connected and ready to send/receive.
    Connected,

    /// Attempting to establish or re-establish the connection.
    Connecting,

    /// Cleanly disconnected (not an error condition).
    Disconnected,

    /// An unrecoverable (or pre-retry) error occurred.
    Error(String),
}

/// Everything an adapter can push into the pipeline.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A normalized inbound message from a contact.
    Inbound(NormalizedMessage),

    /// The operator wrote to this contact from their own device — the
    /// pipeline pauses the conversation until an explicit resume. The
    /// text (when the transport exposes it) feeds the style accumulator:
    /// the operator's own words are the best style signal there is.
    FromMe {
        channel: ChannelId,
        contact_id: String,
        content: Option<String>,
        timestamp_ms: i64,
    },

    /// Adapter connection state changed.
    Status {
        channel: ChannelId,
        status: ChannelStatus,
    },
}

/// Content for an outbound send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl OutboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media_url: None,
        }
    }
}

/// Result of a send attempt. Failures are values, never panics — the
/// pipeline decides how to surface them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Directory entry returned by `Channel::get_contacts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub contact_id: String,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub is_group: bool,
}
