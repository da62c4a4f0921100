//! End-to-end pipeline tests against in-memory stores, a mock channel
//! adapter, and a scripted LLM provider.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use doppel_admission::AdmissionDecision;
use doppel_channels::{
    Channel, ChannelError, ChannelEvent, ChannelManager, ChannelStatus, ContactInfo,
    OutboundContent, SendResult,
};
use doppel_core::config::DoppelConfig;
use doppel_core::events::EventBus;
use doppel_core::types::{
    date_key, now_ms, ChannelId, ContactKey, NormalizedMessage, PauseReason,
};
use doppel_kv::{keys, KvStore};
use doppel_llm::{ChatRequest, ChatResponse, LlmProvider, ProviderError, TokenUsage};
use doppel_memory::types::{Persona, StyleProfile, Tier};
use doppel_memory::MemoryStore;
use doppel_pipeline::{deferred, Pipeline, PipelineDeps};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

struct ScriptedProvider {
    requests: Mutex<Vec<ChatRequest>>,
    reply: Mutex<String>,
    fail: AtomicBool,
    delay_ms: AtomicU64,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Mutex::new("sure, sounds good".to_string()),
            fail: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ChatRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                status: 500,
                message: "scripted failure".into(),
            });
        }
        Ok(ChatResponse {
            content: self.reply.lock().unwrap().clone(),
            model: req.model.clone(),
            usage: TokenUsage {
                input: 50,
                output: 12,
                cache_read: 5,
                cache_write: 3,
            },
            stop_reason: "end_turn".into(),
        })
    }
}

struct MockChannel {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl Channel for MockChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Telegram
    }
    fn display_name(&self) -> &str {
        "Mock"
    }
    fn icon(&self) -> &str {
        "mock"
    }
    fn status(&self) -> ChannelStatus {
        ChannelStatus::Connected
    }
    async fn connect(&self) -> Result<(), ChannelError> {
        Ok(())
    }
    async fn disconnect(&self) -> Result<(), ChannelError> {
        Ok(())
    }
    async fn send_message(&self, to: &str, content: &OutboundContent) -> SendResult {
        if self.fail_sends.load(Ordering::SeqCst) {
            return SendResult::failed("mock transport down");
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), content.text.clone()));
        SendResult::sent(format!("mock-{}", self.sent.lock().unwrap().len()))
    }
    async fn send_typing_indicator(&self, _to: &str, _duration_ms: u64) {}
    async fn get_contacts(&self) -> Result<Vec<ContactInfo>, ChannelError> {
        Ok(Vec::new())
    }
    async fn get_contact(&self, contact_id: &str) -> Result<ContactInfo, ChannelError> {
        Err(ChannelError::UnknownContact(contact_id.to_string()))
    }
    fn normalize_contact_id(&self, raw: &str) -> String {
        raw.to_string()
    }
}

struct Harness {
    pipeline: Pipeline,
    kv: Arc<KvStore>,
    mem: Arc<MemoryStore>,
    provider: Arc<ScriptedProvider>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    fail_sends: Arc<AtomicBool>,
}

fn harness(tweak: impl FnOnce(&mut DoppelConfig)) -> Harness {
    let mut config = DoppelConfig::default();
    // Fast tests: no typing delay, no sleep window unless a test asks.
    config.hts.max_delay_ms = 0;
    config.sleep_hours.enabled = false;
    tweak(&mut config);

    let kv = Arc::new(KvStore::open_in_memory().unwrap());
    let mem = Arc::new(MemoryStore::open_in_memory().unwrap());
    let provider = Arc::new(ScriptedProvider::new());
    let sent = Arc::new(Mutex::new(Vec::new()));
    let fail_sends = Arc::new(AtomicBool::new(false));

    let mut manager = ChannelManager::new();
    manager.register(Arc::new(MockChannel {
        sent: Arc::clone(&sent),
        fail_sends: Arc::clone(&fail_sends),
    }));

    let pipeline = Pipeline::new(PipelineDeps {
        config,
        kv: Arc::clone(&kv),
        mem: Arc::clone(&mem),
        bus: EventBus::new(),
        provider: Arc::clone(&provider) as Arc<dyn LlmProvider>,
        channels: Arc::new(manager),
    });

    Harness {
        pipeline,
        kv,
        mem,
        provider,
        sent,
        fail_sends,
    }
}

impl Harness {
    fn approve(&self, contact: &str) {
        self.mem
            .approve(
                &format!("telegram:{contact}"),
                "+1555",
                "operator",
                Tier::Standard,
                None,
                None,
            )
            .unwrap();
    }

    async fn inbound(&self, contact: &str, id: &str, content: &str) {
        self.pipeline
            .handle_event(ChannelEvent::Inbound(message(contact, id, content)))
            .await;
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

fn message(contact: &str, id: &str, content: &str) -> NormalizedMessage {
    NormalizedMessage {
        id: id.to_string(),
        version: 2,
        channel: Some(ChannelId::Telegram),
        contact_id: contact.to_string(),
        normalized_contact_id: None,
        content: content.to_string(),
        timestamp_ms: now_ms(),
        media_type: None,
        media_url: None,
        reply_to: None,
        metadata: None,
    }
}

fn contact_key(contact: &str) -> ContactKey {
    ContactKey::new(ChannelId::Telegram, contact)
}

/// Poll until `cond` holds or the timeout elapses.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..250 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within timeout");
}

/// Give in-flight workers a moment to finish anything they should NOT do.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn phatic_fast_path_skips_classification_llm() {
    let h = harness(|_| {});
    h.approve("alice");

    h.inbound("alice", "m1", "ok").await;
    wait_until(|| h.sent_count() == 1).await;

    // Exactly one LLM call: the phatic generator on the small model.
    assert_eq!(h.provider.request_count(), 1);
    let req = h.provider.last_request();
    assert_eq!(req.model, "claude-haiku-4-5");
    assert_eq!(req.messages.len(), 1);

    // Token split: classification stayed zero, response did not.
    let stats = h.kv.tokens(&date_key(now_ms())).unwrap();
    assert_eq!(stats.classification, 0);
    assert!(stats.response > 0);
    assert_eq!(stats.total_messages, 1);
}

#[tokio::test]
async fn substantive_message_carries_all_prompt_blocks() {
    let h = harness(|_| {});
    h.approve("alice");

    // A usable style profile (≥ 10 samples) for the style block.
    let mut style = StyleProfile::new("telegram:alice");
    style.sample_count = 12;
    style.avg_message_length = 40.0;
    h.mem.upsert_style(&style).unwrap();

    h.inbound("alice", "m1", "Are we still on for the sync tomorrow?")
        .await;
    wait_until(|| h.sent_count() == 1).await;

    let req = h.provider.last_request();
    assert_eq!(req.model, "claude-sonnet-4-5");
    // preamble, persona, graph, style, guidelines
    assert_eq!(req.system.len(), 5);
    assert_eq!(
        req.system.iter().filter(|b| b.cacheable).count(),
        3,
        "persona, graph, and style blocks are the cache breakpoints"
    );

    let stats = h.kv.tokens(&date_key(now_ms())).unwrap();
    assert!(stats.response > 0);
    assert!(stats.cache_read > 0);
    assert!(stats.cache_write > 0);
}

#[tokio::test]
async fn unknown_contact_gets_one_auto_reply_and_a_pairing_request() {
    let h = harness(|_| {});

    h.inbound("stranger", "m1", "hey, who is this?").await;
    wait_until(|| h.sent_count() == 1).await;

    // The canned reply went out, but no LLM call happened.
    assert_eq!(h.provider.request_count(), 0);
    let pairing = h.mem.get_pairing("telegram:stranger").unwrap().unwrap();
    assert_eq!(pairing.first_message.as_deref(), Some("hey, who is this?"));

    // A second message refreshes the request without another reply.
    h.inbound("stranger", "m2", "hello??").await;
    settle().await;
    assert_eq!(h.sent_count(), 1);
    assert_eq!(h.provider.request_count(), 0);
}

#[tokio::test]
async fn from_me_pauses_until_explicit_resume() {
    let h = harness(|_| {});
    h.approve("alice");

    h.pipeline
        .handle_event(ChannelEvent::FromMe {
            channel: ChannelId::Telegram,
            contact_id: "alice".into(),
            content: Some("I'll take this one myself".into()),
            timestamp_ms: now_ms(),
        })
        .await;

    let pause = h
        .kv
        .get_pause(&keys::pause(&contact_key("alice")))
        .unwrap()
        .unwrap();
    assert_eq!(pause.reason, PauseReason::FromMe);

    // Inbound while paused: no reply, no LLM call.
    h.inbound("alice", "m1", "are you there?").await;
    settle().await;
    assert_eq!(h.sent_count(), 0);
    assert_eq!(h.provider.request_count(), 0);

    // Explicit resume restores replies.
    h.pipeline
        .pauses()
        .resume_contact(&contact_key("alice"))
        .unwrap();
    h.inbound("alice", "m2", "are you there now?").await;
    wait_until(|| h.sent_count() == 1).await;
}

#[tokio::test]
async fn rate_limit_breach_pauses_and_later_messages_stop_at_pause_gate() {
    let h = harness(|_| {});
    h.approve("alice");

    // Messages 1–10 pass; the 11th breaches and pauses.
    for i in 1..=11 {
        h.inbound("alice", &format!("m{i}"), "ok").await;
    }
    wait_until(|| h.sent_count() == 10).await;
    wait_until(|| {
        h.kv.get_pause(&keys::pause(&contact_key("alice")))
            .unwrap()
            .is_some()
    })
    .await;
    let pause = h
        .kv
        .get_pause(&keys::pause(&contact_key("alice")))
        .unwrap()
        .unwrap();
    assert_eq!(pause.reason, PauseReason::RateLimit);

    // The 12th is cut off at the pause check; the counter stays put.
    let count_before = h.kv.counter(&keys::counter(&contact_key("alice"))).unwrap();
    h.inbound("alice", "m12", "ok").await;
    settle().await;
    assert_eq!(h.sent_count(), 10);
    assert_eq!(
        h.kv.counter(&keys::counter(&contact_key("alice"))).unwrap(),
        count_before
    );
}

#[tokio::test]
async fn per_contact_fifo_with_cross_contact_parallelism() {
    let h = harness(|_| {});
    h.approve("alice");
    h.approve("bob");
    h.provider.delay_ms.store(100, Ordering::SeqCst);

    h.inbound("alice", "a1", "first for alice").await;
    h.inbound("alice", "a2", "second for alice").await;
    h.inbound("bob", "b1", "only one for bob").await;
    wait_until(|| h.sent_count() == 3).await;

    let sent = h.sent.lock().unwrap().clone();
    // Every reply carries the same scripted text; order by recipient.
    let alice_replies: Vec<usize> = sent
        .iter()
        .enumerate()
        .filter(|(_, (to, _))| to == "alice")
        .map(|(i, _)| i)
        .collect();
    let bob_reply = sent.iter().position(|(to, _)| to == "bob").unwrap();

    assert_eq!(alice_replies.len(), 2);
    // FIFO within alice…
    assert!(alice_replies[0] < alice_replies[1]);
    // …and bob was not stuck behind alice's queue.
    assert!(bob_reply < alice_replies[1]);
}

#[tokio::test]
async fn generation_failure_sends_nothing() {
    let h = harness(|_| {});
    h.approve("alice");
    h.provider.fail.store(true, Ordering::SeqCst);

    h.inbound("alice", "m1", "what time works for you?").await;
    settle().await;

    assert_eq!(h.sent_count(), 0);
    // The inbound message still counted against the rate window.
    assert_eq!(
        h.kv.counter(&keys::counter(&contact_key("alice"))).unwrap(),
        1
    );
}

#[tokio::test]
async fn send_failure_is_reported_not_retried() {
    let h = harness(|_| {});
    h.approve("alice");
    h.fail_sends.store(true, Ordering::SeqCst);

    h.inbound("alice", "m1", "ok").await;
    settle().await;

    assert_eq!(h.sent_count(), 0);
    // Exactly one generation attempt — no automatic replay.
    assert_eq!(h.provider.request_count(), 1);
}

#[tokio::test]
async fn sleep_hours_defer_messages_and_reinjection_skips_the_gate() {
    let h = harness(|config| {
        // A window that definitely covers "now".
        let now = chrono::Utc::now();
        let start = now - chrono::Duration::minutes(30);
        let end = now + chrono::Duration::minutes(30);
        config.sleep_hours.enabled = true;
        config.sleep_hours.start_hour = chrono::Timelike::hour(&start) as u8;
        config.sleep_hours.start_minute = chrono::Timelike::minute(&start) as u8;
        config.sleep_hours.end_hour = chrono::Timelike::hour(&end) as u8;
        config.sleep_hours.end_minute = chrono::Timelike::minute(&end) as u8;
        config.sleep_hours.timezone_offset_hours = 0;
    });
    h.approve("alice");

    h.inbound("alice", "m1", "you up?").await;
    wait_until(|| h.kv.defer_len().unwrap() == 1).await;
    assert_eq!(h.sent_count(), 0);
    assert_eq!(h.provider.request_count(), 0);

    // Re-injected messages (deferred scheduler path) skip the sleep gate.
    h.pipeline.enqueue(message("alice", "m2", "you up??"), true).await;
    wait_until(|| h.sent_count() == 1).await;
}

#[tokio::test]
async fn deferred_scheduler_reinjects_due_messages() {
    let h = harness(|config| {
        config.pipeline.deferred_poll_seconds = 1;
    });
    h.approve("alice");

    // Park a message whose wake-up time has already passed.
    let payload = serde_json::to_value(message("alice", "m1", "good morning!")).unwrap();
    h.kv.defer_push(&payload, now_ms() - 1_000).unwrap();

    let cancel = h.pipeline.cancel_token();
    let scheduler = tokio::spawn(deferred::run_deferred_scheduler(
        h.pipeline.clone(),
        cancel.clone(),
    ));

    wait_until(|| h.sent_count() == 1).await;
    assert_eq!(h.kv.defer_len().unwrap(), 0);

    cancel.cancel();
    let _ = scheduler.await;
}

#[tokio::test]
async fn high_confidence_signal_overrides_persona_for_one_response() {
    let h = harness(|_| {});
    h.approve("alice");
    h.mem
        .upsert_persona(
            &Persona {
                id: "romantic".into(),
                name: "Romantic".into(),
                style_guide: "affectionate, playful".into(),
                tone: "soft".into(),
                example_messages: vec![],
                applicable_to: vec![doppel_core::types::RelationshipType::RomanticPartner],
            },
            false,
        )
        .unwrap();

    // "miss you" carries a 0.95 RomanticPartner signal; "?" forces the
    // substantive path so the persona block is observable.
    h.inbound("alice", "m1", "miss you, when are you back?").await;
    wait_until(|| h.sent_count() == 1).await;

    let req = h.provider.last_request();
    assert!(
        req.system.iter().any(|b| b.text.contains("Romantic")),
        "override signal must select the romantic persona"
    );
    // One-shot: nothing was durably written.
    assert!(h.mem.get_scores("telegram:alice").unwrap().is_none());

    // The signal itself was queued for the accumulator.
    let queued = h
        .kv
        .stream_read_after(keys::STREAM_SIGNALS, 0, 10)
        .unwrap();
    assert_eq!(queued.len(), 1);
}

#[tokio::test]
async fn admission_gate_blocks_denied_contacts_silently() {
    let h = harness(|_| {});
    h.approve("mallory");
    h.pipeline
        .gate()
        .deny("telegram:mallory", "operator", Some("spam"))
        .unwrap();

    h.inbound("mallory", "m1", "hello?").await;
    settle().await;
    assert_eq!(h.sent_count(), 0);
    assert_eq!(h.provider.request_count(), 0);

    // decide() is stable for identical inputs.
    let decision = h
        .pipeline
        .gate()
        .decide(&message("mallory", "m2", "hello again"))
        .unwrap();
    assert!(matches!(decision, AdmissionDecision::Drop(_)));
}

#[tokio::test]
async fn replies_and_inbound_turns_land_in_history() {
    let h = harness(|_| {});
    h.approve("alice");

    h.inbound("alice", "m1", "ok").await;
    wait_until(|| h.sent_count() == 1).await;
    wait_until(|| {
        h.kv.history_len(&keys::history(&contact_key("alice")))
            .unwrap()
            == 2
    })
    .await;

    let turns = h
        .kv
        .history_recent(&keys::history(&contact_key("alice")), 10)
        .unwrap();
    assert_eq!(turns[0].content, "ok");
    assert_eq!(turns[1].content, "sure, sounds good");
}
