//! Human-typing simulation and dispatch.
//!
//! Delay = base typing time (30 ms + 2 ms per character + jitter up to
//! 500 ms) plus a cognitive pause that grows with the gap since the last
//! message in the conversation, capped by config. The dispatcher shows the
//! typing indicator for the delay window, sleeps, then sends.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use doppel_core::config::HtsConfig;
use doppel_core::types::{now_ms, ContactKey};
use doppel_channels::{Channel, OutboundContent, SendResult};
use doppel_kv::{keys, KvStore};

/// Fixed keystroke model: 30 ms reaction + 2 ms per character.
const BASE_MS: u64 = 30;
const PER_CHAR_MS: u64 = 2;
const JITTER_MAX_MS: u64 = 500;

/// Bound on the adapter send call.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Cognitive pause: stepped, monotonically increasing in the elapsed time
/// since the previous message, zero when there is no prior message (the
/// mark expires after an hour). A longer gap means the "typist" needs a
/// moment to get back into the conversation.
fn cognitive_pause_ms(elapsed_ms: Option<i64>) -> u64 {
    match elapsed_ms {
        None => 0,
        Some(ms) if ms < 30_000 => 0,
        Some(ms) if ms < 300_000 => 400,
        Some(ms) if ms < 900_000 => 900,
        Some(_) => 1_400,
    }
}

/// Total delay before the reply is sent, capped at `max_delay_ms`.
pub fn compute_delay_ms(
    reply_chars: usize,
    elapsed_ms: Option<i64>,
    jitter_ms: u64,
    max_delay_ms: u64,
) -> u64 {
    let typing = BASE_MS + PER_CHAR_MS * reply_chars as u64 + jitter_ms;
    (typing + cognitive_pause_ms(elapsed_ms)).min(max_delay_ms)
}

#[derive(Clone)]
pub struct HtsDispatcher {
    kv: Arc<KvStore>,
    config: HtsConfig,
}

impl HtsDispatcher {
    pub fn new(kv: Arc<KvStore>, config: HtsConfig) -> Self {
        Self { kv, config }
    }

    /// Wait out the computed delay (typing indicator showing), then send.
    ///
    /// A failed or timed-out send comes back as `SendResult { ok: false }`;
    /// the dispatcher never retries — the operator replays manually.
    pub async fn dispatch(
        &self,
        adapter: &(dyn Channel + Send + Sync),
        contact: &ContactKey,
        text: &str,
    ) -> SendResult {
        let mark_key = keys::hts_last_message(contact);
        let now = now_ms();
        let elapsed = match self.kv.get_mark(&mark_key) {
            Ok(Some(last)) => Some(now - last),
            Ok(None) => None,
            Err(e) => {
                warn!(contact = %contact, error = %e, "HTS mark read failed");
                None
            }
        };

        let jitter = rand::rng().random_range(0..=JITTER_MAX_MS);
        let delay = compute_delay_ms(
            text.chars().count(),
            elapsed,
            jitter,
            self.config.max_delay_ms,
        );
        debug!(contact = %contact, delay_ms = delay, "dispatching with typing delay");

        adapter
            .send_typing_indicator(&contact.contact_id, delay)
            .await;
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let result = match tokio::time::timeout(
            SEND_TIMEOUT,
            adapter.send_message(&contact.contact_id, &OutboundContent::text(text)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => SendResult::failed(format!(
                "send timed out after {}ms",
                SEND_TIMEOUT.as_millis()
            )),
        };

        if result.ok {
            if let Err(e) = self
                .kv
                .set_mark(&mark_key, now_ms(), keys::HTS_MARK_TTL_SECS)
            {
                warn!(contact = %contact, error = %e, "HTS mark write failed");
            }
        }
        result
    }
}
