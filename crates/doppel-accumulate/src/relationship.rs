//! Relationship-signal accumulator.
//!
//! Consumes the `relationship_signals` stream, batching up to 10 signals
//! per contact (or 30 s, whichever first) before folding them into the
//! durable scores. Scores decay by 0.95 per day since the last update.
//! The current relationship type changes only when at least 3 signals
//! have been seen AND the challenger leads the incumbent by 0.3 — and a
//! Family or Friend classification is never downgraded to Acquaintance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use doppel_core::types::{now_ms, RelationshipSignal, RelationshipType};
use doppel_kv::{keys, KvStore};
use doppel_memory::types::AccumulatedScores;
use doppel_memory::MemoryStore;

/// Signals per contact that force a flush.
const BATCH_SIZE: usize = 10;
/// Oldest pending signal age that forces a flush.
const BATCH_AGE: Duration = Duration::from_secs(30);
/// Stream poll cadence.
const POLL: Duration = Duration::from_secs(2);
/// Entries read per poll.
const READ_LIMIT: usize = 100;
/// Daily decay factor applied to all scores.
const DAILY_DECAY: f64 = 0.95;
/// Minimum signals before the current type may change.
const MIN_SIGNALS: u32 = 3;
/// Lead the challenger needs over the incumbent score.
const SCORE_DELTA_GATE: f64 = 0.3;
/// Durable cursor key (a KV mark with a long TTL).
const CURSOR_KEY: &str = "CURSOR:relationship_signals";
const CURSOR_TTL_SECS: u64 = 30 * 24 * 3600;

struct Pending {
    signals: Vec<RelationshipSignal>,
    oldest_ms: i64,
}

pub struct RelationshipAccumulator {
    kv: Arc<KvStore>,
    mem: Arc<MemoryStore>,
    cursor: i64,
    pending: HashMap<String, Pending>,
}

impl RelationshipAccumulator {
    pub fn new(kv: Arc<KvStore>, mem: Arc<MemoryStore>) -> Self {
        let cursor = kv.get_mark(CURSOR_KEY).ok().flatten().unwrap_or(0);
        Self {
            kv,
            mem,
            cursor,
            pending: HashMap::new(),
        }
    }

    /// Consume the stream until cancelled; flushes everything on the way
    /// out.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(cursor = self.cursor, "relationship accumulator started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(POLL) => {}
            }
            self.drain_stream();
            self.flush_ready(false);
        }
        self.flush_ready(true);
        info!("relationship accumulator stopped");
    }

    fn drain_stream(&mut self) {
        let entries = match self
            .kv
            .stream_read_after(keys::STREAM_SIGNALS, self.cursor, READ_LIMIT)
        {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "signal stream read failed");
                return;
            }
        };

        for entry in entries {
            self.cursor = entry.seq;
            let Some(contact_key) = entry
                .payload
                .get("contact_key")
                .and_then(|v| v.as_str())
                .map(String::from)
            else {
                warn!(seq = entry.seq, "signal entry missing contact_key");
                continue;
            };
            let signal: RelationshipSignal = match entry
                .payload
                .get("signal")
                .cloned()
                .map(serde_json::from_value)
            {
                Some(Ok(signal)) => signal,
                _ => {
                    warn!(seq = entry.seq, "discarding malformed signal entry");
                    continue;
                }
            };

            let pending = self.pending.entry(contact_key).or_insert_with(|| Pending {
                signals: Vec::new(),
                oldest_ms: now_ms(),
            });
            pending.signals.push(signal);
        }

        if let Err(e) = self.kv.set_mark(CURSOR_KEY, self.cursor, CURSOR_TTL_SECS) {
            warn!(error = %e, "signal cursor persist failed");
        }
        if let Err(e) = self.kv.stream_delete_upto(keys::STREAM_SIGNALS, self.cursor) {
            warn!(error = %e, "signal stream trim failed");
        }
    }

    fn flush_ready(&mut self, force: bool) {
        let now = now_ms();
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| {
                force
                    || p.signals.len() >= BATCH_SIZE
                    || now - p.oldest_ms >= BATCH_AGE.as_millis() as i64
            })
            .map(|(k, _)| k.clone())
            .collect();

        for contact_key in ready {
            if let Some(pending) = self.pending.remove(&contact_key) {
                if let Err(e) = self.apply(&contact_key, &pending.signals) {
                    error!(contact = %contact_key, error = %e, "signal flush failed");
                }
            }
        }
    }

    fn apply(
        &self,
        contact_key: &str,
        signals: &[RelationshipSignal],
    ) -> Result<(), doppel_memory::MemoryError> {
        if signals.is_empty() {
            return Ok(());
        }
        let mut scores = self
            .mem
            .get_scores(contact_key)?
            .unwrap_or_else(|| AccumulatedScores::new(contact_key));

        decay(&mut scores);
        for signal in signals {
            *scores.scores.entry(signal.relationship).or_insert(0.0) += signal.confidence;
        }
        scores.signal_count += signals.len() as u32;
        scores.last_updated = Utc::now().to_rfc3339();

        if let Some((challenger, top_score)) = scores.top() {
            let incumbent_score = scores
                .current_type
                .and_then(|t| scores.scores.get(&t).copied())
                .unwrap_or(0.0);
            let changes = scores.current_type != Some(challenger)
                && scores.signal_count >= MIN_SIGNALS
                && top_score - incumbent_score >= SCORE_DELTA_GATE
                && !is_forbidden_downgrade(scores.current_type, challenger);
            if changes {
                info!(
                    contact = %contact_key,
                    from = ?scores.current_type,
                    to = %challenger,
                    "relationship type updated"
                );
                scores.current_type = Some(challenger);
            }
            if scores.current_type == Some(challenger) {
                let total: f64 = scores.scores.values().filter(|s| **s > 0.0).sum();
                scores.current_confidence = if total > 0.0 { top_score / total } else { 0.0 };
            }
        }

        debug!(contact = %contact_key, count = signals.len(), "signals folded into scores");
        self.mem.upsert_scores(&scores)
    }
}

/// Multiply every score by 0.95 per whole day since the last update.
fn decay(scores: &mut AccumulatedScores) {
    let last = chrono::DateTime::parse_from_rfc3339(&scores.last_updated)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    let days = (Utc::now() - last).num_days();
    if days <= 0 {
        return;
    }
    let factor = DAILY_DECAY.powi(days as i32);
    for value in scores.scores.values_mut() {
        *value *= factor;
    }
}

/// Family and Friend never decay into Acquaintance automatically.
fn is_forbidden_downgrade(current: Option<RelationshipType>, next: RelationshipType) -> bool {
    matches!(
        current,
        Some(RelationshipType::Family) | Some(RelationshipType::Friend)
    ) && next == RelationshipType::Acquaintance
}
