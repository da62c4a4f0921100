//! Style accumulator.
//!
//! Consumes the outgoing-message stream (`QUEUE:responses`, which carries
//! both generated replies and the operator's own from-me messages) and
//! maintains a running per-contact writing profile. Changes flush to MEM
//! once at least 5 messages are pending and the profile has reached the
//! 10-sample floor; the KV style cache is invalidated on every flush.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use doppel_core::types::ContactKey;
use doppel_kv::{keys, KvStore};
use doppel_memory::types::{StyleProfile, STYLE_MIN_SAMPLES};
use doppel_memory::MemoryStore;

/// Pending messages per contact before a flush is attempted.
const FLUSH_PENDING: usize = 5;
/// Stream poll cadence.
const POLL: Duration = Duration::from_secs(2);
/// Entries read per poll.
const READ_LIMIT: usize = 100;
/// Durable cursor key.
const CURSOR_KEY: &str = "CURSOR:responses";
const CURSOR_TTL_SECS: u64 = 30 * 24 * 3600;

/// Greetings recognized at the start of a message.
const GREETINGS: &[&str] = &[
    "hey", "hi", "hello", "yo", "hiya", "morning", "good morning", "evening", "sup",
];
/// Sign-offs recognized at the end of a message.
const SIGN_OFFS: &[&str] = &[
    "cheers", "thanks", "thx", "later", "talk soon", "ttyl", "best", "night", "xx", "x",
];

/// Extracted features of one outgoing message.
#[derive(Debug, Clone)]
struct MessageFeatures {
    length: usize,
    has_emoji: bool,
    formality: f64,
    has_ellipsis: bool,
    ends_exclamation: bool,
    no_ending_period: bool,
    greeting: Option<String>,
    sign_off: Option<String>,
}

pub struct StyleAccumulator {
    kv: Arc<KvStore>,
    mem: Arc<MemoryStore>,
    cursor: i64,
    pending: HashMap<String, Vec<MessageFeatures>>,
}

impl StyleAccumulator {
    pub fn new(kv: Arc<KvStore>, mem: Arc<MemoryStore>) -> Self {
        let cursor = kv.get_mark(CURSOR_KEY).ok().flatten().unwrap_or(0);
        Self {
            kv,
            mem,
            cursor,
            pending: HashMap::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(cursor = self.cursor, "style accumulator started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(POLL) => {}
            }
            self.drain_stream();
            self.flush_ready(false);
        }
        self.flush_ready(true);
        info!("style accumulator stopped");
    }

    fn drain_stream(&mut self) {
        let entries = match self
            .kv
            .stream_read_after(keys::STREAM_RESPONSES, self.cursor, READ_LIMIT)
        {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "response stream read failed");
                return;
            }
        };

        for entry in entries {
            self.cursor = entry.seq;
            let contact_key = entry.payload.get("contact_key").and_then(|v| v.as_str());
            let content = entry.payload.get("content").and_then(|v| v.as_str());
            let (Some(contact_key), Some(content)) = (contact_key, content) else {
                warn!(seq = entry.seq, "discarding malformed response entry");
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }
            self.pending
                .entry(contact_key.to_string())
                .or_default()
                .push(analyze(content));
        }

        if let Err(e) = self.kv.set_mark(CURSOR_KEY, self.cursor, CURSOR_TTL_SECS) {
            warn!(error = %e, "response cursor persist failed");
        }
        if let Err(e) = self
            .kv
            .stream_delete_upto(keys::STREAM_RESPONSES, self.cursor)
        {
            warn!(error = %e, "response stream trim failed");
        }
    }

    fn flush_ready(&mut self, force: bool) {
        let contacts: Vec<String> = self.pending.keys().cloned().collect();
        for contact_key in contacts {
            let pending_count = self.pending.get(&contact_key).map(Vec::len).unwrap_or(0);
            if pending_count == 0 {
                continue;
            }
            let persisted = self
                .mem
                .get_style(&contact_key)
                .ok()
                .flatten()
                .map(|p| p.sample_count)
                .unwrap_or(0);
            let enough = pending_count >= FLUSH_PENDING
                && persisted + pending_count as u32 >= STYLE_MIN_SAMPLES;
            if !(force || enough) {
                continue;
            }
            let features = self.pending.remove(&contact_key).unwrap_or_default();
            if let Err(e) = self.flush(&contact_key, &features) {
                error!(contact = %contact_key, error = %e, "style flush failed");
            }
        }
    }

    fn flush(
        &self,
        contact_key: &str,
        features: &[MessageFeatures],
    ) -> Result<(), doppel_memory::MemoryError> {
        if features.is_empty() {
            return Ok(());
        }
        let mut profile = self
            .mem
            .get_style(contact_key)?
            .unwrap_or_else(|| StyleProfile::new(contact_key));

        let n = f64::from(profile.sample_count);
        let k = features.len() as f64;
        let total = n + k;

        let sum_len: f64 = features.iter().map(|f| f.length as f64).sum();
        profile.avg_message_length = (profile.avg_message_length * n + sum_len) / total;

        profile.emoji_frequency = merge_freq(
            profile.emoji_frequency,
            n,
            features.iter().filter(|f| f.has_emoji).count(),
            k,
        );
        let sum_formality: f64 = features.iter().map(|f| f.formality).sum();
        profile.formality_score = (profile.formality_score * n + sum_formality) / total;

        let p = &mut profile.punctuation_style;
        p.ellipsis_frequency = merge_freq(
            p.ellipsis_frequency,
            n,
            features.iter().filter(|f| f.has_ellipsis).count(),
            k,
        );
        p.exclamation_frequency = merge_freq(
            p.exclamation_frequency,
            n,
            features.iter().filter(|f| f.ends_exclamation).count(),
            k,
        );
        p.no_ending_period_frequency = merge_freq(
            p.no_ending_period_frequency,
            n,
            features.iter().filter(|f| f.no_ending_period).count(),
            k,
        );

        for feature in features {
            if let Some(greeting) = &feature.greeting {
                push_limited(&mut profile.greeting_style, greeting);
            }
            if let Some(sign_off) = &feature.sign_off {
                push_limited(&mut profile.sign_off_style, sign_off);
            }
        }

        profile.sample_count += features.len() as u32;
        profile.last_updated = Utc::now().to_rfc3339();
        for (name, value) in [
            ("length", confidence_for(profile.sample_count, 30)),
            ("emoji", confidence_for(profile.sample_count, 20)),
            ("formality", confidence_for(profile.sample_count, 40)),
        ] {
            profile.feature_confidence.insert(name.to_string(), value);
        }

        self.mem.upsert_style(&profile)?;

        // Best-effort cache invalidation; the TTL bounds staleness anyway.
        if let Ok(contact) = ContactKey::parse(contact_key) {
            if let Err(e) = self.kv.cache_delete(&keys::style_cache(&contact)) {
                warn!(contact = %contact_key, error = %e, "style cache invalidation failed");
            }
        }

        debug!(
            contact = %contact_key,
            samples = profile.sample_count,
            "style profile flushed"
        );
        Ok(())
    }
}

/// Merge an observed-fraction feature: `prior` over `n` samples plus
/// `hits` out of `k` new ones.
fn merge_freq(prior: f64, n: f64, hits: usize, k: f64) -> f64 {
    (prior * n + hits as f64) / (n + k)
}

/// Keep up to 5 distinct entries, first-seen order.
fn push_limited(list: &mut Vec<String>, value: &str) {
    if list.iter().any(|v| v == value) {
        return;
    }
    if list.len() < 5 {
        list.push(value.to_string());
    }
}

fn confidence_for(samples: u32, saturation: u32) -> f64 {
    (f64::from(samples) / f64::from(saturation)).min(1.0)
}

/// Words that read as informal register.
const SLANG: &[&str] = &[
    "lol", "omg", "gonna", "wanna", "gotta", "yeah", "nah", "dunno", "u", "ur", "btw", "idk",
];

fn analyze(content: &str) -> MessageFeatures {
    let trimmed = content.trim();
    let lowered = trimmed.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    let has_emoji = trimmed.chars().any(is_emoji_char);
    let last_char = trimmed.chars().last().unwrap_or(' ');

    let mut formality: f64 = 0.5;
    if trimmed.chars().next().map(char::is_uppercase).unwrap_or(false) {
        formality += 0.2;
    }
    if last_char == '.' {
        formality += 0.2;
    }
    if words.iter().any(|w| SLANG.contains(w)) {
        formality -= 0.3;
    }
    if has_emoji {
        formality -= 0.1;
    }
    let formality = formality.clamp(0.0, 1.0);

    let greeting = {
        // Leading words with punctuation stripped, so "hey!" still counts.
        let head: Vec<String> = words
            .iter()
            .take(2)
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_string()
            })
            .collect();
        let two = (head.len() == 2).then(|| head.join(" "));
        let one = head.first().cloned();
        two.filter(|g| GREETINGS.contains(&g.as_str()))
            .or(one.filter(|g| GREETINGS.contains(&g.as_str())))
    };
    let stripped = lowered.trim_end_matches(['.', '!', '?', '…']);
    let sign_off = SIGN_OFFS
        .iter()
        .find(|s| stripped.ends_with(*s) && stripped.len() > s.len())
        .map(|s| s.to_string());

    MessageFeatures {
        length: trimmed.chars().count(),
        has_emoji,
        formality,
        has_ellipsis: trimmed.contains("...") || trimmed.contains('…'),
        ends_exclamation: last_char == '!',
        no_ending_period: last_char.is_alphanumeric(),
        greeting,
        sign_off,
    }
}

fn is_emoji_char(c: char) -> bool {
    matches!(u32::from(c),
        0x1F300..=0x1FAFF
        | 0x2600..=0x27BF
        | 0x1F1E6..=0x1F1FF
        | 0xFE0F
        | 0x2764
    )
}
