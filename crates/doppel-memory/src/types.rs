use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use doppel_core::types::RelationshipType;

/// Coarse trust level attached to an approved contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Trusted,
    Standard,
    Restricted,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Trusted => write!(f, "trusted"),
            Tier::Standard => write!(f, "standard"),
            Tier::Restricted => write!(f, "restricted"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trusted" => Ok(Tier::Trusted),
            "standard" => Ok(Tier::Standard),
            "restricted" => Ok(Tier::Restricted),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Lifecycle state of a pairing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl std::fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingStatus::Pending => write!(f, "pending"),
            PairingStatus::Approved => write!(f, "approved"),
            PairingStatus::Denied => write!(f, "denied"),
            PairingStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for PairingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PairingStatus::Pending),
            "approved" => Ok(PairingStatus::Approved),
            "denied" => Ok(PairingStatus::Denied),
            "expired" => Ok(PairingStatus::Expired),
            other => Err(format!("unknown pairing status: {other}")),
        }
    }
}

/// First-message excerpt length kept on a pairing request.
pub const FIRST_MESSAGE_MAX: usize = 120;

/// A contact waiting for operator approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRequest {
    pub contact_key: String,
    pub phone_number: String,
    pub requested_at: String,
    pub status: PairingStatus,
    pub display_name: Option<String>,
    pub channel: Option<String>,
    pub first_message: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
}

/// A contact the pipeline is allowed to answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedContact {
    pub contact_key: String,
    pub phone_number: String,
    pub approved_at: String,
    pub approved_by: String,
    pub tier: Tier,
    pub display_name: Option<String>,
    pub channel: Option<String>,
    pub notes: Option<String>,
    /// Explicit persona assignment; overrides relationship-based selection.
    pub persona_id: Option<String>,
}

/// A contact in denial cooldown — dropped silently until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeniedContact {
    pub contact_key: String,
    pub phone_number: String,
    pub denied_at: String,
    pub denied_by: String,
    pub expires_at: String,
    pub reason: Option<String>,
}

/// Style specification attached to a relationship type or a specific contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub style_guide: String,
    pub tone: String,
    pub example_messages: Vec<String>,
    pub applicable_to: Vec<RelationshipType>,
}

impl Persona {
    /// Hard-coded fallback used when MEM holds no usable persona at all.
    pub fn fallback() -> Self {
        Self {
            id: "fallback".into(),
            name: "Neutral".into(),
            style_guide: "Reply briefly and naturally, matching the sender's tone. \
                          Avoid sounding like an assistant."
                .into(),
            tone: "neutral".into(),
            example_messages: Vec::new(),
            applicable_to: Vec::new(),
        }
    }
}

/// Confidence label derived from sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleConfidence {
    Low,
    Medium,
    High,
}

/// Minimum samples before a style profile is usable for prompting.
pub const STYLE_MIN_SAMPLES: u32 = 10;

/// Empirically derived per-contact writing pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleProfile {
    pub contact_key: String,
    pub avg_message_length: f64,
    /// Fraction of sampled messages containing at least one emoji.
    pub emoji_frequency: f64,
    /// 0.0 (very casual) … 1.0 (very formal).
    pub formality_score: f64,
    pub punctuation_style: PunctuationStyle,
    /// Up to 5 most common opening phrases.
    pub greeting_style: Vec<String>,
    /// Up to 5 most common closing phrases.
    pub sign_off_style: Vec<String>,
    pub sample_count: u32,
    pub last_updated: String,
    /// Per-feature confidence, 0.0–1.0.
    pub feature_confidence: HashMap<String, f64>,
}

impl StyleProfile {
    pub fn new(contact_key: impl Into<String>) -> Self {
        Self {
            contact_key: contact_key.into(),
            avg_message_length: 0.0,
            emoji_frequency: 0.0,
            formality_score: 0.5,
            punctuation_style: PunctuationStyle::default(),
            greeting_style: Vec::new(),
            sign_off_style: Vec::new(),
            sample_count: 0,
            last_updated: chrono::Utc::now().to_rfc3339(),
            feature_confidence: HashMap::new(),
        }
    }

    pub fn confidence(&self) -> StyleConfidence {
        match self.sample_count {
            0..=9 => StyleConfidence::Low,
            10..=49 => StyleConfidence::Medium,
            _ => StyleConfidence::High,
        }
    }
}

/// Observed punctuation habits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PunctuationStyle {
    /// Fraction of messages using "..." or "…".
    pub ellipsis_frequency: f64,
    /// Fraction of messages ending with "!".
    pub exclamation_frequency: f64,
    /// Fraction of messages ending without terminal punctuation.
    pub no_ending_period_frequency: f64,
}

/// Decayed per-type relationship scores for one contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccumulatedScores {
    pub contact_key: String,
    pub scores: HashMap<RelationshipType, f64>,
    pub current_type: Option<RelationshipType>,
    pub current_confidence: f64,
    pub signal_count: u32,
    pub last_updated: String,
}

impl AccumulatedScores {
    pub fn new(contact_key: impl Into<String>) -> Self {
        Self {
            contact_key: contact_key.into(),
            scores: HashMap::new(),
            current_type: None,
            current_confidence: 0.0,
            signal_count: 0,
            last_updated: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Highest-scoring relationship type, if any score is positive.
    pub fn top(&self) -> Option<(RelationshipType, f64)> {
        self.scores
            .iter()
            .filter(|(_, s)| **s > 0.0)
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(t, s)| (*t, *s))
    }
}

/// Kind of a knowledge-graph entity related to a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Topic,
    Event,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Person => write!(f, "person"),
            EntityKind::Topic => write!(f, "topic"),
            EntityKind::Event => write!(f, "event"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(EntityKind::Person),
            "topic" => Ok(EntityKind::Topic),
            "event" => Ok(EntityKind::Event),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Knowledge-graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntity {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub summary: Option<String>,
}

/// Everything the graph knows about one contact, grouped by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphContext {
    pub display_name: Option<String>,
    pub people: Vec<GraphEntity>,
    pub topics: Vec<GraphEntity>,
    pub events: Vec<GraphEntity>,
}

impl GraphContext {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.people.is_empty()
            && self.topics.is_empty()
            && self.events.is_empty()
    }
}
