//! Relationship-signal extraction.
//!
//! Regex pattern tables over message content, one table per direction.
//! Each pattern carries a fixed confidence weight; when several match,
//! the highest-confidence one wins. Extraction is a side effect of
//! classification — signals land on the `relationship_signals` stream for
//! the background accumulator, and a ≥ 0.9 signal additionally overrides
//! persona selection for the single response it came from.

use once_cell::sync::Lazy;
use regex::Regex;

use doppel_core::types::{
    RelationshipSignal, RelationshipType, SignalSource, SIGNAL_EVIDENCE_MAX,
};

/// Confidence at or above which a signal overrides the stored type for the
/// current response.
pub const OVERRIDE_CONFIDENCE: f64 = 0.9;

struct Pattern {
    regex: Regex,
    relationship: RelationshipType,
    confidence: f64,
}

fn pattern(re: &str, relationship: RelationshipType, confidence: f64) -> Pattern {
    Pattern {
        regex: Regex::new(re).expect("static signal pattern must compile"),
        relationship,
        confidence,
    }
}

/// Patterns matched against messages the contact sent to the operator.
static INCOMING: Lazy<Vec<Pattern>> = Lazy::new(|| {
    use RelationshipType::*;
    vec![
        pattern(r"(?i)\b(love you|miss you|hey (babe|honey|sweetheart))\b", RomanticPartner, 0.95),
        pattern(r"(?i)\b(mom|dad|your (brother|sister|cousin)|family dinner)\b", Family, 0.9),
        pattern(r"(?i)\b(per my review|your performance|report to me|direct report)\b", Manager, 0.85),
        pattern(r"(?i)\b(invoice|contract|proposal|deliverable|statement of work)\b", Client, 0.8),
        pattern(r"(?i)\b(standup|sprint|code review|retro|the deploy|on.?call)\b", Colleague, 0.7),
        pattern(r"(?i)\b(beers?|game night|wanna hang|that party)\b", Friend, 0.6),
        pattern(r"(?i)\b(nice to meet you|we met at)\b", Acquaintance, 0.5),
    ]
});

/// Patterns matched against messages the operator sent to the contact.
static OUTGOING: Lazy<Vec<Pattern>> = Lazy::new(|| {
    use RelationshipType::*;
    vec![
        pattern(r"(?i)\b(love you( too)?|miss you|good night (babe|love))\b", RomanticPartner, 0.95),
        pattern(r"(?i)\b(tell (mom|dad)|see you at (thanksgiving|christmas))\b", Family, 0.9),
        pattern(r"(?i)\b(i'?ll have the (report|deck) ready|thanks for the feedback)\b", Manager, 0.75),
        pattern(r"(?i)\b(i'?ll send (the|an) (invoice|quote|proposal))\b", Client, 0.8),
        pattern(r"(?i)\b(i'?ll pick up that ticket|merging now|after standup)\b", Colleague, 0.7),
        pattern(r"(?i)\b(see you (tonight|saturday)|that was so fun)\b", Friend, 0.6),
    ]
});

/// Extract the best relationship signal from `content`, if any pattern
/// matches. Evidence is the matched text, truncated to 50 characters.
pub fn extract(content: &str, source: SignalSource) -> Option<RelationshipSignal> {
    let table: &[Pattern] = match source {
        SignalSource::Incoming => &INCOMING,
        SignalSource::Outgoing => &OUTGOING,
    };

    let mut best: Option<(&Pattern, String)> = None;
    for pattern in table {
        if let Some(found) = pattern.regex.find(content) {
            let better = best
                .as_ref()
                .map(|(b, _)| pattern.confidence > b.confidence)
                .unwrap_or(true);
            if better {
                best = Some((pattern, found.as_str().to_string()));
            }
        }
    }

    best.map(|(pattern, evidence)| RelationshipSignal {
        relationship: pattern.relationship,
        confidence: pattern.confidence,
        evidence: evidence.chars().take(SIGNAL_EVIDENCE_MAX).collect(),
        source,
    })
}
