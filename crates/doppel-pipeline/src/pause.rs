//! Pause controller.
//!
//! Gates replies globally (`PAUSE:ALL`) or per contact (`PAUSE:{contact}`).
//! State lives in the KV store so a pause survives restarts; every
//! transition is published on the event bus for observers.

use std::sync::Arc;

use tracing::info;

use doppel_core::events::{Event, EventBus, PauseAction};
use doppel_core::types::{now_ms, ContactKey, PauseReason, PauseState};
use doppel_kv::{keys, KvStore};

use crate::error::Result;

#[derive(Clone)]
pub struct PauseController {
    kv: Arc<KvStore>,
    bus: EventBus,
}

impl PauseController {
    pub fn new(kv: Arc<KvStore>, bus: EventBus) -> Self {
        Self { kv, bus }
    }

    /// Pause every contact.
    pub fn pause_all(&self, reason: PauseReason) -> Result<()> {
        let state = PauseState {
            paused_at_ms: now_ms(),
            reason,
        };
        self.kv.set_pause(keys::PAUSE_ALL, state)?;
        info!(%reason, "global pause set");
        self.publish(None, PauseAction::Pause, Some(reason));
        Ok(())
    }

    /// Lift the global pause. Contact-specific pauses are untouched.
    pub fn resume_all(&self) -> Result<()> {
        if self.kv.clear_pause(keys::PAUSE_ALL)? {
            info!("global pause cleared");
            self.publish(None, PauseAction::Resume, None);
        }
        Ok(())
    }

    /// Pause a single contact. `reason=FromMe` and `reason=Manual` stay
    /// until an explicit resume; `reason=RateLimit` is set by the limiter.
    pub fn pause_contact(&self, contact: &ContactKey, reason: PauseReason) -> Result<()> {
        let state = PauseState {
            paused_at_ms: now_ms(),
            reason,
        };
        self.kv.set_pause(&keys::pause(contact), state)?;
        info!(contact = %contact, %reason, "contact paused");
        self.publish(Some(contact), PauseAction::Pause, Some(reason));
        Ok(())
    }

    /// Resume a single contact; also restarts its rate-limit window so a
    /// resume after a breach does not immediately re-pause.
    pub fn resume_contact(&self, contact: &ContactKey) -> Result<()> {
        if self.kv.clear_pause(&keys::pause(contact))? {
            self.kv.clear_counter(&keys::counter(contact))?;
            info!(contact = %contact, "contact resumed");
            self.publish(Some(contact), PauseAction::Resume, None);
        }
        Ok(())
    }

    /// The pause state governing this contact, if any. Global pause wins.
    pub fn is_paused(&self, contact: &ContactKey) -> Result<Option<PauseState>> {
        if let Some(state) = self.kv.get_pause(keys::PAUSE_ALL)? {
            return Ok(Some(state));
        }
        Ok(self.kv.get_pause(&keys::pause(contact))?)
    }

    fn publish(
        &self,
        contact: Option<&ContactKey>,
        action: PauseAction,
        reason: Option<PauseReason>,
    ) {
        self.bus.publish(Event::PauseUpdate {
            contact_key: contact.map(|c| c.to_string()),
            channel: contact.map(|c| c.channel),
            action,
            reason,
            timestamp_ms: now_ms(),
        });
    }
}

#[cfg(test)]
mod tests {
    use doppel_core::types::ChannelId;

    use super::*;

    fn controller() -> PauseController {
        PauseController::new(Arc::new(KvStore::open_in_memory().unwrap()), EventBus::new())
    }

    fn contact() -> ContactKey {
        ContactKey::new(ChannelId::Telegram, "1")
    }

    #[test]
    fn global_pause_wins_over_contact_state() {
        let ctl = controller();
        assert!(ctl.is_paused(&contact()).unwrap().is_none());
        ctl.pause_all(PauseReason::Manual).unwrap();
        let state = ctl.is_paused(&contact()).unwrap().unwrap();
        assert_eq!(state.reason, PauseReason::Manual);
        ctl.resume_all().unwrap();
        assert!(ctl.is_paused(&contact()).unwrap().is_none());
    }

    #[test]
    fn contact_pause_round_trip() {
        let ctl = controller();
        ctl.pause_contact(&contact(), PauseReason::FromMe).unwrap();
        assert_eq!(
            ctl.is_paused(&contact()).unwrap().unwrap().reason,
            PauseReason::FromMe
        );
        // Other contacts unaffected.
        let other = ContactKey::new(ChannelId::Telegram, "2");
        assert!(ctl.is_paused(&other).unwrap().is_none());
        ctl.resume_contact(&contact()).unwrap();
        assert!(ctl.is_paused(&contact()).unwrap().is_none());
    }

    #[test]
    fn transitions_publish_events() {
        let ctl = controller();
        let mut rx = ctl.bus.subscribe();
        ctl.pause_contact(&contact(), PauseReason::RateLimit)
            .unwrap();
        match rx.try_recv().unwrap() {
            Event::PauseUpdate { action, reason, .. } => {
                assert_eq!(action, PauseAction::Pause);
                assert_eq!(reason, Some(PauseReason::RateLimit));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn resume_clears_rate_window() {
        let ctl = controller();
        let key = keys::counter(&contact());
        ctl.kv.incr_with_window(&key, 60).unwrap();
        ctl.pause_contact(&contact(), PauseReason::RateLimit)
            .unwrap();
        ctl.resume_contact(&contact()).unwrap();
        assert_eq!(ctl.kv.counter(&key).unwrap(), 0);
    }
}
