//! Pipeline coordinator.
//!
//! Owns the per-contact work queues: every contact gets one worker task
//! fed by an mpsc channel, so replies to a contact are strictly ordered,
//! while different contacts run in parallel under a semaphore ceiling.
//! Workers are spawned lazily and retire after an idle minute.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use doppel_admission::{AdmissionDecision, AdmissionGate};
use doppel_channels::{Channel, ChannelEvent, ChannelManager, OutboundContent};
use doppel_core::config::DoppelConfig;
use doppel_core::events::{Event, EventBus, MessageStatus};
use doppel_core::types::{
    date_key, now_ms, ContactKey, ConversationTurn, NormalizedMessage, PauseReason,
    RelationshipSignal, SignalSource, TurnKind, TurnRole,
};
use doppel_kv::{keys, KvStore, TokenDelta};
use doppel_llm::LlmProvider;
use doppel_memory::MemoryStore;

use crate::classify::{Classifier, MessageClass};
use crate::context::ContextAssembler;
use crate::generate::ResponseGenerator;
use crate::hts::HtsDispatcher;
use crate::limiter::RateLimiter;
use crate::pause::PauseController;
use crate::signal::{self, OVERRIDE_CONFIDENCE};
use crate::sleep::SleepSchedule;

/// Per-contact queue depth before enqueue applies backpressure.
const QUEUE_DEPTH: usize = 64;
/// An idle worker retires after this long without a message.
const WORKER_IDLE: Duration = Duration::from_secs(60);

/// Everything the coordinator is built from.
pub struct PipelineDeps {
    pub config: DoppelConfig,
    pub kv: Arc<KvStore>,
    pub mem: Arc<MemoryStore>,
    pub bus: EventBus,
    pub provider: Arc<dyn LlmProvider>,
    pub channels: Arc<ChannelManager>,
}

struct Job {
    msg: NormalizedMessage,
    /// Set for messages re-injected by the deferred scheduler so they do
    /// not bounce straight back into the deferred queue.
    skip_sleep: bool,
}

/// Cloneable handle to the running pipeline.
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: DoppelConfig,
    pub(crate) kv: Arc<KvStore>,
    bus: EventBus,
    channels: Arc<ChannelManager>,
    gate: AdmissionGate,
    limiter: RateLimiter,
    pauses: PauseController,
    sleep: SleepSchedule,
    classifier: Classifier,
    assembler: ContextAssembler,
    generator: ResponseGenerator,
    dispatcher: HtsDispatcher,
    queues: DashMap<String, mpsc::Sender<Job>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        let PipelineDeps {
            config,
            kv,
            mem,
            bus,
            provider,
            channels,
        } = deps;

        let (response_model, phatic_model) = match &config.providers.anthropic {
            Some(a) => (a.model.clone(), a.classifier_model.clone()),
            None => (
                "claude-sonnet-4-5".to_string(),
                "claude-haiku-4-5".to_string(),
            ),
        };

        let pauses = PauseController::new(Arc::clone(&kv), bus.clone());
        let limiter = RateLimiter::new(
            Arc::clone(&kv),
            pauses.clone(),
            bus.clone(),
            config.rate_limit.clone(),
        );
        let gate = AdmissionGate::new(
            Arc::clone(&mem),
            Arc::clone(&kv),
            bus.clone(),
            config.admission.clone(),
        );
        let assembler = ContextAssembler::new(
            Arc::clone(&mem),
            Arc::clone(&kv),
            config.cache.clone(),
            config.history.clone(),
        );
        let classifier = Classifier::new(Arc::clone(&provider), phatic_model.clone());
        let generator = ResponseGenerator::new(Arc::clone(&provider), response_model, phatic_model);
        let dispatcher = HtsDispatcher::new(Arc::clone(&kv), config.hts.clone());
        let permits = Arc::new(Semaphore::new(config.pipeline.max_concurrency as usize));
        let sleep = SleepSchedule::new(config.sleep_hours.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                kv,
                bus,
                channels,
                gate,
                limiter,
                pauses,
                sleep,
                classifier,
                assembler,
                generator,
                dispatcher,
                queues: DashMap::new(),
                permits,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The admission gate, for the operator side channel (approve/deny).
    pub fn gate(&self) -> &AdmissionGate {
        &self.inner.gate
    }

    /// The pause controller, for the operator side channel.
    pub fn pauses(&self) -> &PauseController {
        &self.inner.pauses
    }

    /// The rate limiter, for the operator side channel.
    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Cancellation token governing workers and background loops.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Stop accepting work and cancel in-flight tasks. Partial KV writes
    /// (counter increments, pause sets) stay — they are monotonic or
    /// idempotent by design.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    /// Entry point for everything an adapter emits.
    pub async fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Inbound(msg) => {
                if let Err(reason) = msg.validate() {
                    warn!(reason = %reason, "discarding malformed inbound message");
                    return;
                }
                self.inner.bus.publish(Event::MessageReceived {
                    contact_key: msg.contact_key().to_string(),
                    message_id: msg.id.clone(),
                    timestamp_ms: now_ms(),
                });
                self.enqueue(msg, false).await;
            }
            ChannelEvent::FromMe {
                channel,
                contact_id,
                content,
                timestamp_ms,
            } => {
                let contact = ContactKey::new(channel, contact_id);
                self.inner
                    .handle_from_me(&contact, content.as_deref(), timestamp_ms);
            }
            ChannelEvent::Status { channel, status } => {
                info!(channel = %channel, ?status, "channel status changed");
            }
        }
    }

    /// Queue a message onto its contact's worker, spawning one if needed.
    pub async fn enqueue(&self, msg: NormalizedMessage, skip_sleep: bool) {
        let key = msg.contact_key().to_string();
        let mut job = Job { msg, skip_sleep };

        loop {
            let tx = self
                .inner
                .queues
                .entry(key.clone())
                .or_insert_with(|| self.spawn_worker(key.clone()))
                .value()
                .clone();

            match tx.send(job).await {
                Ok(()) => return,
                // The worker retired between lookup and send; clear the
                // stale entry and retry with a fresh worker.
                Err(mpsc::error::SendError(returned)) => {
                    self.inner
                        .queues
                        .remove_if(&key, |_, candidate| candidate.same_channel(&tx));
                    job = returned;
                }
            }
        }
    }

    fn spawn_worker(&self, key: String) -> mpsc::Sender<Job> {
        let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_DEPTH);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            debug!(contact = %key, "worker started");
            loop {
                let job = tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    recv = tokio::time::timeout(WORKER_IDLE, rx.recv()) => match recv {
                        Ok(Some(job)) => job,
                        Ok(None) => break,
                        Err(_) => {
                            // Idle: deregister, then drain anything that
                            // raced in before senders saw the closure.
                            inner.queues.remove(&key);
                            rx.close();
                            while let Some(job) = rx.recv().await {
                                inner.run_job(job).await;
                            }
                            break;
                        }
                    },
                };
                inner.run_job(job).await;
            }
            debug!(contact = %key, "worker stopped");
        });

        tx
    }
}

impl Inner {
    async fn run_job(&self, job: Job) {
        let Ok(_permit) = self.permits.acquire().await else {
            return; // semaphore closed during shutdown
        };
        self.process(job.msg, job.skip_sleep).await;
    }

    /// The per-message state machine. Every return before dispatch is one
    /// of the terminal short-circuits (Dropped / Paused / Deferred /
    /// Failed).
    async fn process(&self, msg: NormalizedMessage, skip_sleep: bool) {
        let contact = msg.contact_key();
        let contact_str = contact.to_string();

        // Admission.
        let decision = match self.gate.decide(&msg) {
            Ok(d) => d,
            Err(e) => {
                error!(contact = %contact_str, error = %e, "admission check failed");
                self.publish_status(&contact_str, &msg.id, MessageStatus::Failed, Some(e.to_string()));
                return;
            }
        };
        match decision {
            AdmissionDecision::Admit { .. } => {}
            AdmissionDecision::Drop(reason) => {
                debug!(contact = %contact_str, ?reason, "message dropped at admission");
                self.publish_status(&contact_str, &msg.id, MessageStatus::Dropped, None);
                return;
            }
            AdmissionDecision::Pair { auto_reply } => {
                if let Some(text) = auto_reply {
                    self.send_auto_reply(&msg, &contact, &text).await;
                }
                self.publish_status(&contact_str, &msg.id, MessageStatus::Dropped, None);
                return;
            }
        }

        // Admitted: record the turn and feed the side streams.
        self.record_inbound(&contact, &msg);

        // Pause. A message stopped here never touches the rate window —
        // the breach message itself set the pause, everything after it is
        // cut off at this gate. Fail-open on a read error: availability
        // over gating, the same stance as the rate limiter.
        match self.pauses.is_paused(&contact) {
            Ok(Some(state)) => {
                debug!(contact = %contact_str, reason = %state.reason, "message stopped by pause");
                self.publish_status(&contact_str, &msg.id, MessageStatus::Paused, None);
                return;
            }
            Ok(None) => {}
            Err(e) => error!(contact = %contact_str, error = %e, "pause check failed, continuing"),
        }

        // Rate limit (the counter increments even when generation later
        // fails — every admitted, unpaused inbound message counts).
        let rate = self.limiter.check(&contact);
        if !rate.allowed {
            self.publish_status(
                &contact_str,
                &msg.id,
                MessageStatus::Dropped,
                Some("rate_limited".into()),
            );
            return;
        }

        // Sleep-hour deferral.
        if !skip_sleep && self.sleep.is_sleep_hours(Utc::now()) {
            let wakes_at = self.sleep.wakes_at_ms(Utc::now());
            match serde_json::to_value(&msg) {
                Ok(payload) => match self.kv.defer_push(&payload, wakes_at) {
                    Ok(_) => {
                        debug!(contact = %contact_str, wakes_at, "message deferred for sleep hours");
                        self.publish_status(&contact_str, &msg.id, MessageStatus::Deferred, None);
                        return;
                    }
                    Err(e) => {
                        error!(contact = %contact_str, error = %e, "deferral failed, processing now")
                    }
                },
                Err(e) => error!(error = %e, "deferral encode failed, processing now"),
            }
        }

        // Classification + signal side effects.
        let outcome = self.classifier.classify(&msg.content).await;
        if let Some(usage) = outcome.usage {
            self.record_tokens(TokenDelta {
                classification: i64::from(usage.input) + i64::from(usage.output),
                cache_read: i64::from(usage.cache_read),
                cache_write: i64::from(usage.cache_write),
                ..Default::default()
            });
        }

        let extracted = signal::extract(&msg.content, SignalSource::Incoming);
        if let Some(sig) = &extracted {
            self.enqueue_signal(&contact, sig);
        }
        // A very confident signal overrides persona selection once; the
        // accumulator decides whether anything changes durably.
        let override_relationship = extracted
            .as_ref()
            .filter(|s| s.confidence >= OVERRIDE_CONFIDENCE)
            .map(|s| s.relationship);

        // Context assembly.
        let bundle = match outcome.class {
            MessageClass::Substantive => {
                self.assembler.assemble(&contact, override_relationship).await
            }
            MessageClass::Phatic => {
                self.assembler
                    .persona_only(&contact, override_relationship)
                    .await
            }
        };

        // Generation. Failure is terminal: nothing is sent.
        let response = match self.generator.generate(outcome.class, &bundle, &msg).await {
            Ok(r) => r,
            Err(e) => {
                error!(contact = %contact_str, error = %e, "generation failed");
                self.publish_status(&contact_str, &msg.id, MessageStatus::Failed, Some(e.to_string()));
                return;
            }
        };

        self.record_tokens(TokenDelta {
            response: i64::from(response.usage.input) + i64::from(response.usage.output),
            cache_read: i64::from(response.usage.cache_read),
            cache_write: i64::from(response.usage.cache_write),
            total_messages: 1,
            ..Default::default()
        });
        self.publish_metrics();

        // Dispatch through the typing simulator.
        let Some(adapter) = self.channels.get(msg.channel_id()) else {
            error!(channel = %msg.channel_id(), "no adapter registered for channel");
            self.publish_status(
                &contact_str,
                &msg.id,
                MessageStatus::Failed,
                Some(format!("no adapter for {}", msg.channel_id())),
            );
            return;
        };

        let result = self
            .dispatcher
            .dispatch(adapter.as_ref(), &contact, &response.content)
            .await;

        if result.ok {
            self.record_outbound(&contact, &msg, &response.content, result.message_id.as_deref());
            self.publish_status(&contact_str, &msg.id, MessageStatus::Replied, None);
        } else {
            warn!(contact = %contact_str, error = ?result.error, "send failed, not retrying");
            self.publish_status(&contact_str, &msg.id, MessageStatus::Failed, result.error);
        }
    }

    /// Canned reply to an unknown contact. A failure here must not roll
    /// back the pending pairing request, so errors are only logged.
    async fn send_auto_reply(&self, msg: &NormalizedMessage, contact: &ContactKey, text: &str) {
        let Some(adapter) = self.channels.get(msg.channel_id()) else {
            warn!(channel = %msg.channel_id(), "no adapter for auto-reply");
            return;
        };
        let result = adapter
            .send_message(&contact.contact_id, &OutboundContent::text(text))
            .await;
        if !result.ok {
            warn!(contact = %contact, error = ?result.error, "auto-reply send failed");
        }
    }

    /// FromMe: the operator answered this contact themselves. Pause the
    /// conversation indefinitely, keep the turn in history, and feed the
    /// outgoing-style stream so the accumulator learns from the
    /// operator's own words.
    fn handle_from_me(&self, contact: &ContactKey, content: Option<&str>, timestamp_ms: i64) {
        if let Err(e) = self.pauses.pause_contact(contact, PauseReason::FromMe) {
            error!(contact = %contact, error = %e, "failed to set from-me pause");
        }
        debug!(contact = %contact, timestamp_ms, "from-me event observed");

        let Some(content) = content.filter(|c| !c.trim().is_empty()) else {
            return;
        };
        let turn = ConversationTurn {
            id: format!("fromme-{contact}-{timestamp_ms}"),
            role: TurnRole::Assistant,
            kind: TurnKind::FromMe,
            content: content.to_string(),
            timestamp_ms,
        };
        if let Err(e) = self.kv.history_append(
            &keys::history(contact),
            &turn,
            self.config.history.max_messages,
            self.config.history.ttl_seconds,
        ) {
            warn!(contact = %contact, error = %e, "from-me history append failed");
        }
        let payload = serde_json::json!({
            "contact_key": contact.to_string(),
            "content": content,
            "kind": "from_me",
            "timestamp_ms": timestamp_ms,
        });
        if let Err(e) = self.kv.stream_append(keys::STREAM_RESPONSES, &payload) {
            warn!(contact = %contact, error = %e, "from-me stream append failed");
        }
        if let Some(sig) = signal::extract(content, SignalSource::Outgoing) {
            self.enqueue_signal(contact, &sig);
        }
    }

    fn record_inbound(&self, contact: &ContactKey, msg: &NormalizedMessage) {
        let turn = ConversationTurn {
            id: msg.id.clone(),
            role: TurnRole::User,
            kind: TurnKind::Incoming,
            content: msg.content.clone(),
            timestamp_ms: msg.timestamp_ms,
        };
        if let Err(e) = self.kv.history_append(
            &keys::history(contact),
            &turn,
            self.config.history.max_messages,
            self.config.history.ttl_seconds,
        ) {
            warn!(contact = %contact, error = %e, "history append failed");
        }
        match serde_json::to_value(msg) {
            Ok(payload) => {
                for stream in [keys::STREAM_MESSAGES, keys::STREAM_EXTRACTION] {
                    if let Err(e) = self.kv.stream_append(stream, &payload) {
                        warn!(contact = %contact, stream, error = %e, "stream append failed");
                    }
                }
            }
            Err(e) => warn!(error = %e, "message encode failed for side streams"),
        }
    }

    fn record_outbound(
        &self,
        contact: &ContactKey,
        inbound: &NormalizedMessage,
        reply: &str,
        message_id: Option<&str>,
    ) {
        let id = message_id
            .map(String::from)
            .unwrap_or_else(|| format!("reply-{}", inbound.id));
        let turn = ConversationTurn {
            id,
            role: TurnRole::Assistant,
            kind: TurnKind::Outgoing,
            content: reply.to_string(),
            timestamp_ms: now_ms(),
        };
        if let Err(e) = self.kv.history_append(
            &keys::history(contact),
            &turn,
            self.config.history.max_messages,
            self.config.history.ttl_seconds,
        ) {
            warn!(contact = %contact, error = %e, "reply history append failed");
        }
        let payload = serde_json::json!({
            "contact_key": contact.to_string(),
            "content": reply,
            "kind": "outgoing",
            "timestamp_ms": now_ms(),
        });
        if let Err(e) = self.kv.stream_append(keys::STREAM_RESPONSES, &payload) {
            warn!(contact = %contact, error = %e, "response stream append failed");
        }
        if let Some(sig) = signal::extract(reply, SignalSource::Outgoing) {
            self.enqueue_signal(contact, &sig);
        }
    }

    /// Queue a signal for the background relationship accumulator.
    fn enqueue_signal(&self, contact: &ContactKey, sig: &RelationshipSignal) {
        let payload = serde_json::json!({
            "contact_key": contact.to_string(),
            "signal": sig,
            "timestamp_ms": now_ms(),
        });
        if let Err(e) = self.kv.stream_append(keys::STREAM_SIGNALS, &payload) {
            warn!(contact = %contact, error = %e, "signal enqueue failed");
        }
    }

    fn record_tokens(&self, delta: TokenDelta) {
        let day = date_key(now_ms());
        if let Err(e) = self.kv.record_tokens(&day, delta) {
            warn!(error = %e, "token accounting failed");
        }
    }

    fn publish_metrics(&self) {
        let day = date_key(now_ms());
        if let Ok(stats) = self.kv.tokens(&day) {
            self.bus.publish(Event::MetricsUpdate {
                date_key: day,
                classification_tokens: stats.classification,
                response_tokens: stats.response,
                cache_read_tokens: stats.cache_read,
                cache_write_tokens: stats.cache_write,
                total_messages: stats.total_messages,
                timestamp_ms: now_ms(),
            });
        }
    }

    fn publish_status(
        &self,
        contact_key: &str,
        message_id: &str,
        status: MessageStatus,
        error: Option<String>,
    ) {
        self.bus.publish(Event::MessageStatus {
            contact_key: contact_key.to_string(),
            message_id: message_id.to_string(),
            status,
            error,
            timestamp_ms: now_ms(),
        });
    }
}
