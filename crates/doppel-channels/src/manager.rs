use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use doppel_core::types::ChannelId;

use crate::{channel::Channel, error::ChannelError, types::ChannelStatus};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300; // 5 minutes
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Manages the set of channel adapters.
///
/// Adapters are stored by their [`ChannelId`]. Registration happens once
/// at startup (`&mut self`); afterwards the manager is shared behind an
/// `Arc` and hands out adapter clones, so senders never hold a manager
/// lock across I/O. The manager applies exponential backoff with jitter
/// when a channel connection fails.
pub struct ChannelManager {
    channels: HashMap<ChannelId, Arc<dyn Channel + Send + Sync>>,
}

impl ChannelManager {
    /// Create an empty manager with no registered channels.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel adapter.
    ///
    /// If a channel with the same id is already registered it is replaced.
    pub fn register(&mut self, channel: Arc<dyn Channel + Send + Sync>) {
        let id = channel.id();
        info!(channel = %id, "registering channel adapter");
        self.channels.insert(id, channel);
    }

    /// Connect all registered channels.
    ///
    /// Each channel is connected sequentially. On failure, exponential
    /// backoff with jitter is applied up to [`MAX_ATTEMPTS`] times before
    /// the error is logged and the channel is skipped.
    pub async fn connect_all(&self) {
        for (id, channel) in &self.channels {
            info!(channel = %id, "connecting channel");
            if let Err(e) = connect_with_backoff(*id, channel.as_ref()).await {
                error!(channel = %id, error = %e, "failed to connect channel after retries");
            }
        }
    }

    /// Disconnect all registered channels.
    ///
    /// Errors are logged but do not abort disconnection of remaining
    /// channels.
    pub async fn disconnect_all(&self) {
        for (id, channel) in &self.channels {
            info!(channel = %id, "disconnecting channel");
            if let Err(e) = channel.disconnect().await {
                warn!(channel = %id, error = %e, "error while disconnecting channel");
            }
        }
    }

    /// A clone of the adapter handle for `id`, if registered.
    pub fn get(&self, id: ChannelId) -> Option<Arc<dyn Channel + Send + Sync>> {
        self.channels.get(&id).cloned()
    }

    /// Current [`ChannelStatus`] for every registered channel.
    ///
    /// Sorted by channel id for deterministic output.
    pub fn statuses(&self) -> Vec<(ChannelId, ChannelStatus)> {
        let mut result: Vec<(ChannelId, ChannelStatus)> = self
            .channels
            .iter()
            .map(|(id, ch)| (*id, ch.status()))
            .collect();
        result.sort_by_key(|(id, _)| id.as_str());
        result
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Attempt to connect a single channel with exponential backoff and ±10 % jitter.
///
/// Schedule: 5 s → 10 s → 20 s → … → 300 s (cap), up to [`MAX_ATTEMPTS`] tries.
async fn connect_with_backoff(id: ChannelId, channel: &dyn Channel) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match channel.connect().await {
            Ok(()) => {
                info!(channel = %id, attempt, "channel connected successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %id,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel connect failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    // Unreachable — the loop always returns inside the match arms above.
    unreachable!("backoff loop exited without returning")
}

/// Return a jitter offset (0 … `JITTER_FRACTION * base_secs`) as integer seconds.
///
/// Uses a simple deterministic pseudo-random value derived from the current
/// monotonic timestamp.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}
