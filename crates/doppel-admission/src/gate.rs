use std::sync::Arc;

use tracing::{debug, info, warn};

use doppel_core::config::AdmissionConfig;
use doppel_core::events::{Event, EventBus};
use doppel_core::types::{now_ms, ContactKey, NormalizedMessage};
use doppel_kv::{keys, KvStore};
use doppel_memory::contacts::PairingDetails;
use doppel_memory::types::Tier;
use doppel_memory::MemoryStore;

use crate::error::Result;

/// Why a message was dropped before reaching the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    GroupChat,
    Denied,
}

/// Outcome of the admission check for one inbound message.
#[derive(Debug, Clone)]
pub enum AdmissionDecision {
    /// The contact may reach the pipeline.
    Admit { tier: Tier },

    /// Drop silently — no reply, no pairing request.
    Drop(DropReason),

    /// Unknown contact: a pairing request now exists. When `auto_reply`
    /// is set, the coordinator sends that single canned message; a send
    /// failure must not roll back the pending request.
    Pair { auto_reply: Option<String> },
}

/// Admission gate over the MEM contact tables, with a KV history probe
/// for auto-approval.
pub struct AdmissionGate {
    mem: Arc<MemoryStore>,
    kv: Arc<KvStore>,
    bus: EventBus,
    config: AdmissionConfig,
}

impl AdmissionGate {
    pub fn new(
        mem: Arc<MemoryStore>,
        kv: Arc<KvStore>,
        bus: EventBus,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            mem,
            kv,
            bus,
            config,
        }
    }

    /// Run the decision procedure for an inbound message.
    ///
    /// Order matters: group filter, then denial cooldown, then approval,
    /// then auto-approval, then pairing. Identical inputs produce identical
    /// decisions — the only non-idempotent step is the first-ever message
    /// creating a pending request (and publishing its event).
    pub fn decide(&self, msg: &NormalizedMessage) -> Result<AdmissionDecision> {
        let contact = msg.contact_key();
        let key = contact.to_string();

        // 1. Group chats never reach the pipeline.
        if is_group_message(msg) {
            debug!(contact = %key, "dropping group-chat message");
            return Ok(AdmissionDecision::Drop(DropReason::GroupChat));
        }

        // 2. Denial cooldown: drop silently, no reply.
        if self.mem.get_denied(&key)?.is_some() {
            debug!(contact = %key, "dropping message from denied contact");
            return Ok(AdmissionDecision::Drop(DropReason::Denied));
        }

        // 3. Approved contacts pass straight through.
        if let Some(approved) = self.mem.get_approved(&key)? {
            return Ok(AdmissionDecision::Admit {
                tier: approved.tier,
            });
        }

        // 4. Auto-approval of contacts we already have history with.
        if self.config.auto_approve_existing && self.has_history(&contact) {
            let approved = self.mem.approve(
                &key,
                &phone_number(msg),
                "auto",
                Tier::Standard,
                display_name(msg).as_deref(),
                Some(msg.channel_id().as_str()),
            )?;
            info!(contact = %key, "auto-approved contact with existing history");
            self.bus.publish(Event::PairingApproved {
                contact_key: key,
                approved_by: "auto".into(),
                tier: approved.tier.to_string(),
                timestamp_ms: now_ms(),
            });
            return Ok(AdmissionDecision::Admit {
                tier: approved.tier,
            });
        }

        // 5. Unknown contact: create/refresh a pairing request and stop.
        let details = PairingDetails {
            phone_number: phone_number(msg),
            display_name: display_name(msg),
            channel: Some(msg.channel_id().to_string()),
            first_message: Some(msg.content.clone()),
        };
        let (_, created) = self.mem.upsert_pairing(&key, &details)?;
        if created {
            info!(contact = %key, "pairing request created");
            self.bus.publish(Event::PairingRequest {
                contact_key: key,
                channel: msg.channel_id(),
                display_name: details.display_name.clone(),
                timestamp_ms: now_ms(),
            });
        }
        let auto_reply = (created && self.config.auto_reply_unknown)
            .then(|| self.config.auto_reply_text.clone());
        Ok(AdmissionDecision::Pair { auto_reply })
    }

    /// Approve a contact from the operator side channel (idempotent; a
    /// second call updates the tier in place).
    pub fn approve(&self, contact_key: &str, tier: Tier, approved_by: &str) -> Result<()> {
        let pairing = self.mem.get_pairing(contact_key)?;
        let phone = pairing
            .as_ref()
            .map(|p| p.phone_number.clone())
            .unwrap_or_else(|| contact_key.to_string());
        let display = pairing.as_ref().and_then(|p| p.display_name.clone());
        let channel = pairing.as_ref().and_then(|p| p.channel.clone());

        let approved = self.mem.approve(
            contact_key,
            &phone,
            approved_by,
            tier,
            display.as_deref(),
            channel.as_deref(),
        )?;
        self.bus.publish(Event::PairingApproved {
            contact_key: contact_key.to_string(),
            approved_by: approved_by.to_string(),
            tier: approved.tier.to_string(),
            timestamp_ms: now_ms(),
        });
        Ok(())
    }

    /// Deny a contact: dropped silently until the cooldown expires
    /// (default 24 h, from config).
    pub fn deny(&self, contact_key: &str, denied_by: &str, reason: Option<&str>) -> Result<()> {
        let pairing = self.mem.get_pairing(contact_key)?;
        let phone = pairing
            .map(|p| p.phone_number)
            .unwrap_or_else(|| contact_key.to_string());
        self.mem.deny(
            contact_key,
            &phone,
            denied_by,
            reason,
            self.config.deny_cooldown_hours,
        )?;
        Ok(())
    }

    /// Does the KV store hold conversation history for this contact?
    ///
    /// Fail-open: when the probe errors, the contact is treated as having
    /// history so a transient KV outage never strands a known contact in
    /// pairing. The generated reply still goes through every later gate.
    fn has_history(&self, contact: &ContactKey) -> bool {
        match self.kv.history_len(&keys::history(contact)) {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(contact = %contact, error = %e, "history probe failed, failing open");
                true
            }
        }
    }
}

fn is_group_message(msg: &NormalizedMessage) -> bool {
    msg.metadata
        .as_ref()
        .and_then(|m| m.get("is_group"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn phone_number(msg: &NormalizedMessage) -> String {
    msg.metadata
        .as_ref()
        .and_then(|m| m.get("phone_number"))
        .and_then(|v| v.as_str())
        .unwrap_or(&msg.contact_id)
        .to_string()
}

fn display_name(msg: &NormalizedMessage) -> Option<String> {
    msg.metadata
        .as_ref()
        .and_then(|m| m.get("display_name"))
        .and_then(|v| v.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use doppel_core::config::AdmissionConfig;
    use doppel_core::events::EventBus;
    use doppel_core::types::{ChannelId, ContactKey, ConversationTurn, NormalizedMessage, TurnKind, TurnRole};
    use doppel_kv::{keys, KvStore};
    use doppel_memory::types::Tier;
    use doppel_memory::MemoryStore;

    use super::*;

    fn gate() -> AdmissionGate {
        AdmissionGate::new(
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            Arc::new(KvStore::open_in_memory().unwrap()),
            EventBus::new(),
            AdmissionConfig::default(),
        )
    }

    fn msg(contact: &str, content: &str) -> NormalizedMessage {
        NormalizedMessage {
            id: format!("m-{contact}-{}", content.len()),
            version: 2,
            channel: Some(ChannelId::Telegram),
            contact_id: contact.into(),
            normalized_contact_id: None,
            content: content.into(),
            timestamp_ms: 1_700_000_000_000,
            media_type: None,
            media_url: None,
            reply_to: None,
            metadata: None,
        }
    }

    #[test]
    fn unknown_contact_enters_pairing_with_auto_reply() {
        let gate = gate();
        let mut rx = gate.bus.subscribe();
        match gate.decide(&msg("stranger", "hello there")).unwrap() {
            AdmissionDecision::Pair { auto_reply } => assert!(auto_reply.is_some()),
            other => panic!("expected Pair, got {other:?}"),
        }
        // Event fired once.
        assert!(matches!(
            rx.try_recv().unwrap(),
            Event::PairingRequest { .. }
        ));
        // A repeat message refreshes the request without a second reply.
        match gate.decide(&msg("stranger", "hello again")).unwrap() {
            AdmissionDecision::Pair { auto_reply } => assert!(auto_reply.is_none()),
            other => panic!("expected Pair, got {other:?}"),
        }
    }

    #[test]
    fn approved_contact_is_admitted() {
        let gate = gate();
        gate.mem
            .approve("telegram:friend", "+1555", "operator", Tier::Trusted, None, None)
            .unwrap();
        match gate.decide(&msg("friend", "hey")).unwrap() {
            AdmissionDecision::Admit { tier } => assert_eq!(tier, Tier::Trusted),
            other => panic!("expected Admit, got {other:?}"),
        }
    }

    #[test]
    fn denied_contact_is_dropped_silently() {
        let gate = gate();
        gate.mem
            .deny("telegram:spammer", "+1555", "operator", Some("spam"), 24)
            .unwrap();
        assert!(matches!(
            gate.decide(&msg("spammer", "buy now")).unwrap(),
            AdmissionDecision::Drop(DropReason::Denied)
        ));
    }

    #[test]
    fn group_messages_are_dropped() {
        let gate = gate();
        let mut m = msg("group", "hi all");
        m.metadata = Some(serde_json::json!({"is_group": true}));
        assert!(matches!(
            gate.decide(&m).unwrap(),
            AdmissionDecision::Drop(DropReason::GroupChat)
        ));
    }

    #[test]
    fn contact_with_history_is_auto_approved_at_standard() {
        let gate = gate();
        let contact = ContactKey::new(ChannelId::Telegram, "old-friend");
        gate.kv
            .history_append(
                &keys::history(&contact),
                &ConversationTurn {
                    id: "m0".into(),
                    role: TurnRole::User,
                    kind: TurnKind::Incoming,
                    content: "earlier chat".into(),
                    timestamp_ms: 1,
                },
                100,
                3_600,
            )
            .unwrap();

        match gate.decide(&msg("old-friend", "hey again")).unwrap() {
            AdmissionDecision::Admit { tier } => assert_eq!(tier, Tier::Standard),
            other => panic!("expected Admit, got {other:?}"),
        }
        // Durable record now exists.
        assert!(gate
            .mem
            .get_approved("telegram:old-friend")
            .unwrap()
            .is_some());
    }

    #[test]
    fn approve_side_channel_is_idempotent() {
        let gate = gate();
        gate.decide(&msg("stranger", "hello")).unwrap();
        gate.approve("telegram:stranger", Tier::Standard, "operator")
            .unwrap();
        gate.approve("telegram:stranger", Tier::Trusted, "operator")
            .unwrap();
        let approved = gate.mem.get_approved("telegram:stranger").unwrap().unwrap();
        assert_eq!(approved.tier, Tier::Trusted);
        assert!(gate.mem.pending_pairings().unwrap().is_empty());
    }
}
