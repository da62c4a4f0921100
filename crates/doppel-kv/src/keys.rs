//! Canonical key and stream names.
//!
//! Kept in one place so the schema documented for operators stays in sync
//! with what the code actually writes.

use doppel_core::types::ContactKey;

/// `COUNTER:{contact}:msgs` — sliding-window message counter.
pub fn counter(contact: &ContactKey) -> String {
    format!("COUNTER:{contact}:msgs")
}

/// `PAUSE:ALL` — global pause scope.
pub const PAUSE_ALL: &str = "PAUSE:ALL";

/// `PAUSE:{contact}` — contact pause scope.
pub fn pause(contact: &ContactKey) -> String {
    format!("PAUSE:{contact}")
}

/// `HTS:lastMessage:{contact}` — last-activity mark for the typing simulator.
pub fn hts_last_message(contact: &ContactKey) -> String {
    format!("HTS:lastMessage:{contact}")
}

/// `HISTORY:{contact}` — the per-contact history partition key.
pub fn history(contact: &ContactKey) -> String {
    format!("HISTORY:{contact}")
}

/// `CACHE:persona:{contact}` — selected-persona snapshot.
pub fn persona_cache(contact: &ContactKey) -> String {
    format!("CACHE:persona:{contact}")
}

/// `CACHE:style:{contact}` — style-profile snapshot.
pub fn style_cache(contact: &ContactKey) -> String {
    format!("CACHE:style:{contact}")
}

/// Append-only streams.
pub const STREAM_MESSAGES: &str = "QUEUE:messages";
pub const STREAM_RESPONSES: &str = "QUEUE:responses";
pub const STREAM_EXTRACTION: &str = "QUEUE:messages_for_extraction";
pub const STREAM_SIGNALS: &str = "QUEUE:relationship_signals";

/// `STATS:tokens:{YYYY-MM-DD}` date key is stored bare in the stats table.
pub const STATS_TTL_SECS: u64 = 30 * 24 * 3600;

/// `HTS:lastMessage` mark lifetime.
pub const HTS_MARK_TTL_SECS: u64 = 3_600;
