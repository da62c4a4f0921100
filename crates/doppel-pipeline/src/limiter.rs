//! Sliding-window rate limiter.
//!
//! One atomic KV primitive does the heavy lifting: increment-and-arm-TTL
//! in a single transaction. On breach the limiter optionally pauses the
//! contact (reason=rate_limit) and publishes a `rate_limit` event.
//!
//! Failure policy: if the KV store is unreachable the limiter fails OPEN —
//! availability over strict limiting.

use std::sync::Arc;

use tracing::{error, warn};

use doppel_core::config::RateLimitConfig;
use doppel_core::events::{Event, EventBus};
use doppel_core::types::{now_ms, ContactKey, PauseReason};
use doppel_kv::{keys, KvStore};

use crate::error::Result;
use crate::pause::PauseController;

/// Outcome of one rate check.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    pub current_count: i64,
    pub threshold: u32,
    pub window_seconds: u32,
    pub auto_paused: bool,
}

#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<KvStore>,
    pauses: PauseController,
    bus: EventBus,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(
        kv: Arc<KvStore>,
        pauses: PauseController,
        bus: EventBus,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            kv,
            pauses,
            bus,
            config,
        }
    }

    /// Count this message against the contact's window and decide.
    ///
    /// The first `threshold` messages inside a window pass; everything
    /// after is rejected until the window TTL expires. On the first breach
    /// with `auto_pause` enabled the contact is paused.
    pub fn check(&self, contact: &ContactKey) -> RateDecision {
        let key = keys::counter(contact);
        let count = match self.kv.incr_with_window(&key, self.config.window_seconds) {
            Ok(count) => count,
            Err(e) => {
                // Fail-open: never let a storage outage silence a contact.
                error!(contact = %contact, error = %e, "rate counter unavailable, failing open");
                return RateDecision {
                    allowed: true,
                    current_count: 0,
                    threshold: self.config.threshold,
                    window_seconds: self.config.window_seconds,
                    auto_paused: false,
                };
            }
        };

        if count <= i64::from(self.config.threshold) {
            return RateDecision {
                allowed: true,
                current_count: count,
                threshold: self.config.threshold,
                window_seconds: self.config.window_seconds,
                auto_paused: false,
            };
        }

        let mut auto_paused = false;
        if self.config.auto_pause {
            match self.pauses.pause_contact(contact, PauseReason::RateLimit) {
                Ok(()) => auto_paused = true,
                Err(e) => warn!(contact = %contact, error = %e, "failed to set rate-limit pause"),
            }
        }
        self.bus.publish(Event::RateLimit {
            contact_key: contact.to_string(),
            current_count: count,
            threshold: self.config.threshold,
            auto_paused,
            timestamp_ms: now_ms(),
        });
        RateDecision {
            allowed: false,
            current_count: count,
            threshold: self.config.threshold,
            window_seconds: self.config.window_seconds,
            auto_paused,
        }
    }

    /// Current window count without incrementing.
    pub fn count(&self, contact: &ContactKey) -> Result<i64> {
        Ok(self.kv.counter(&keys::counter(contact))?)
    }

    /// Restart the contact's window; optionally lift a rate-limit pause.
    pub fn reset(&self, contact: &ContactKey, clear_pause: bool) -> Result<()> {
        self.kv.clear_counter(&keys::counter(contact))?;
        if clear_pause {
            self.pauses.resume_contact(contact)?;
        }
        Ok(())
    }
}
