use std::fmt;

use serde::{Deserialize, Serialize};

/// Schema version emitted for new normalized messages.
///
/// Version 1 messages (no channel field) are still accepted by
/// [`NormalizedMessage::validate`] to support rolling upgrades.
pub const MESSAGE_SCHEMA_VERSION: u8 = 2;

/// Supported transport channels. Frozen set — adding a value is a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    Whatsapp,
    Telegram,
    Discord,
    Slack,
}

impl ChannelId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::Whatsapp => "whatsapp",
            ChannelId::Telegram => "telegram",
            ChannelId::Discord => "discord",
            ChannelId::Slack => "slack",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(ChannelId::Whatsapp),
            "telegram" => Ok(ChannelId::Telegram),
            "discord" => Ok(ChannelId::Discord),
            "slack" => Ok(ChannelId::Slack),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

/// Contact identity — the pair (channel, platform-native contact id).
///
/// Canonical encoding `"{channel}:{contact_id}"` is the key used in every
/// KV and MEM table, so two contacts with the same platform id on different
/// channels never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactKey {
    pub channel: ChannelId,
    pub contact_id: String,
}

impl ContactKey {
    pub fn new(channel: ChannelId, contact_id: impl Into<String>) -> Self {
        Self {
            channel,
            contact_id: contact_id.into(),
        }
    }

    /// Parse the canonical `"{channel}:{contact_id}"` encoding.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (channel, contact_id) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed contact key: {s}"))?;
        if contact_id.is_empty() {
            return Err(format!("malformed contact key: {s}"));
        }
        Ok(Self {
            channel: channel.parse()?,
            contact_id: contact_id.to_string(),
        })
    }
}

impl fmt::Display for ContactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.contact_id)
    }
}

/// Media kind attached to a normalized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

/// Channel assumed for version 1 messages, which predate the `channel`
/// field. Those emitters were WhatsApp-only.
pub const LEGACY_CHANNEL: ChannelId = ChannelId::Whatsapp;

/// Transport-agnostic inbound message produced by a channel adapter.
///
/// Every adapter normalizes its platform event into this shape before the
/// message enters the pipeline. `id` must be stable so history de-dup works
/// across redeliveries.
///
/// Wire compatibility: both `version` and `channel` may be absent. A
/// payload carrying neither is exactly the legacy version 1 shape, so
/// deserialization cannot tell a genuine v1 emitter from an incomplete
/// newer payload — [`validate`](Self::validate) accepts it as v1 (with
/// the channel resolving to [`LEGACY_CHANNEL`]) and requires the field
/// only on version 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: u8,
    /// Absent only on version 1 payloads; read through
    /// [`channel_id`](Self::channel_id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,
    pub contact_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_contact_id: Option<String>,
    pub content: String,
    /// Unix epoch milliseconds.
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// An absent `version` means the payload predates the field — version 1.
fn default_version() -> u8 {
    1
}

impl NormalizedMessage {
    /// Channel the message arrived on, resolving absent (legacy v1) to
    /// [`LEGACY_CHANNEL`].
    pub fn channel_id(&self) -> ChannelId {
        self.channel.unwrap_or(LEGACY_CHANNEL)
    }

    /// Contact key for this message, preferring the normalized contact id.
    pub fn contact_key(&self) -> ContactKey {
        let id = self
            .normalized_contact_id
            .as_deref()
            .unwrap_or(&self.contact_id);
        ContactKey::new(self.channel_id(), id)
    }

    /// Type-guard for records read back from external storage.
    ///
    /// Accepts schema versions 1 and 2; version 1 may omit `channel`,
    /// version 2 must carry it. Anything else (or an empty id / contact
    /// id / timestamp) is treated as malformed and the record is
    /// discarded by the caller.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty message id".into());
        }
        if self.contact_id.is_empty() {
            return Err("empty contact id".into());
        }
        if self.timestamp_ms <= 0 {
            return Err(format!("invalid timestamp: {}", self.timestamp_ms));
        }
        match self.version {
            1 => Ok(()),
            2 if self.channel.is_none() => {
                Err("version 2 message missing channel".into())
            }
            2 => Ok(()),
            v => Err(format!("unsupported message schema version: {v}")),
        }
    }
}

/// Why a scope is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Manual,
    FromMe,
    RateLimit,
    Sleep,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::Manual => write!(f, "manual"),
            PauseReason::FromMe => write!(f, "from_me"),
            PauseReason::RateLimit => write!(f, "rate_limit"),
            PauseReason::Sleep => write!(f, "sleep"),
        }
    }
}

impl std::str::FromStr for PauseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(PauseReason::Manual),
            "from_me" => Ok(PauseReason::FromMe),
            "rate_limit" => Ok(PauseReason::RateLimit),
            "sleep" => Ok(PauseReason::Sleep),
            other => Err(format!("unknown pause reason: {other}")),
        }
    }
}

/// Pause record stored under `PAUSE:ALL` or `PAUSE:{contact}`.
///
/// No implicit expiry — an explicit resume is required (the sleep window is
/// handled by deferral, not by a pause key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseState {
    pub paused_at_ms: i64,
    pub reason: PauseReason,
}

/// Role of a stored conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// How the stored turn entered the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Incoming,
    Outgoing,
    FromMe,
}

/// One entry of the bounded per-contact conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub role: TurnRole,
    pub kind: TurnKind,
    pub content: String,
    pub timestamp_ms: i64,
}

/// Relationship categories a contact can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Colleague,
    Client,
    Manager,
    Friend,
    Acquaintance,
    Family,
    RomanticPartner,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 7] = [
        RelationshipType::Colleague,
        RelationshipType::Client,
        RelationshipType::Manager,
        RelationshipType::Friend,
        RelationshipType::Acquaintance,
        RelationshipType::Family,
        RelationshipType::RomanticPartner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Colleague => "colleague",
            RelationshipType::Client => "client",
            RelationshipType::Manager => "manager",
            RelationshipType::Friend => "friend",
            RelationshipType::Acquaintance => "acquaintance",
            RelationshipType::Family => "family",
            RelationshipType::RomanticPartner => "romantic_partner",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "colleague" => Ok(RelationshipType::Colleague),
            "client" => Ok(RelationshipType::Client),
            "manager" => Ok(RelationshipType::Manager),
            "friend" => Ok(RelationshipType::Friend),
            "acquaintance" => Ok(RelationshipType::Acquaintance),
            "family" => Ok(RelationshipType::Family),
            "romantic_partner" => Ok(RelationshipType::RomanticPartner),
            other => Err(format!("unknown relationship type: {other}")),
        }
    }
}

/// Which direction the message that produced a signal was traveling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    Incoming,
    Outgoing,
}

/// Maximum characters of matched text kept as evidence on a signal.
pub const SIGNAL_EVIDENCE_MAX: usize = 50;

/// A relationship hint extracted from message content.
///
/// Signals with confidence ≥ 0.9 additionally override the stored
/// relationship type for the single response that produced them; durable
/// changes are decided by the accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipSignal {
    pub relationship: RelationshipType,
    pub confidence: f64,
    pub evidence: String,
    pub source: SignalSource,
}

/// Current epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Date key `YYYY-MM-DD` (UTC) used for daily token accounting.
pub fn date_key(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .unwrap_or_else(chrono::Utc::now)
        .format("%Y-%m-%d")
        .to_string()
}
