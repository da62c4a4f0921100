//! Response generation.
//!
//! Phatic messages go to the small model with the persona alone.
//! Substantive messages go to the larger model with the full ordered
//! system prompt: role preamble, persona [cacheable], graph context
//! [cacheable], style summary [cacheable, gated], response guidelines.
//! Conversation history rides along as preceding user/assistant turns with
//! the current message last.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use doppel_core::types::{NormalizedMessage, TurnRole};
use doppel_llm::{
    ChatMessage, ChatRequest, ChatResponse, LlmProvider, PromptBlock, Role,
};
use doppel_memory::types::{GraphContext, StyleProfile, STYLE_MIN_SAMPLES};

use crate::classify::MessageClass;
use crate::context::ContextBundle;
use crate::error::{PipelineError, Result};

/// Bound on one generation call.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(30);

const PHATIC_MAX_TOKENS: u32 = 100;
const SUBSTANTIVE_MAX_TOKENS: u32 = 1024;

const ROLE_PREAMBLE: &str = "You are answering chat messages on behalf of the account owner. \
     Write exactly as they would — first person, their voice, no \
     assistant mannerisms, no meta commentary. Never mention being \
     automated.";

const RESPONSE_GUIDELINES: &str = "Guidelines: keep the reply proportional to the incoming message; \
     answer questions directly; do not invent facts about people or \
     events that are not in the context above; when unsure, keep it \
     brief and noncommittal.";

pub struct ResponseGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    phatic_model: String,
}

impl ResponseGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: String, phatic_model: String) -> Self {
        Self {
            provider,
            model,
            phatic_model,
        }
    }

    /// Generate the reply for `msg` given the assembled context.
    ///
    /// A provider failure (or the 30 s timeout) is a pipeline error —
    /// nothing is sent downstream.
    pub async fn generate(
        &self,
        class: MessageClass,
        bundle: &ContextBundle,
        msg: &NormalizedMessage,
    ) -> Result<ChatResponse> {
        let req = match class {
            MessageClass::Phatic => self.phatic_request(bundle, msg),
            MessageClass::Substantive => self.substantive_request(bundle, msg),
        };

        info!(
            model = %req.model,
            blocks = req.system.len(),
            history = req.messages.len() - 1,
            "invoking response generator"
        );

        match tokio::time::timeout(GENERATE_TIMEOUT, self.provider.send(&req)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(PipelineError::GenerationTimeout {
                ms: GENERATE_TIMEOUT.as_millis() as u64,
            }),
        }
    }

    fn phatic_request(&self, bundle: &ContextBundle, msg: &NormalizedMessage) -> ChatRequest {
        ChatRequest {
            model: self.phatic_model.clone(),
            system: vec![
                PromptBlock::plain(ROLE_PREAMBLE),
                PromptBlock::cached(persona_block(bundle)),
                PromptBlock::plain(
                    "The incoming message is a short acknowledgement. Reply with a \
                     brief, natural acknowledgement in kind — a few words at most.",
                ),
            ],
            messages: vec![ChatMessage {
                role: Role::User,
                content: msg.content.clone(),
            }],
            max_tokens: PHATIC_MAX_TOKENS,
        }
    }

    fn substantive_request(&self, bundle: &ContextBundle, msg: &NormalizedMessage) -> ChatRequest {
        let mut system = vec![
            PromptBlock::plain(ROLE_PREAMBLE),
            PromptBlock::cached(persona_block(bundle)),
            PromptBlock::cached(format_graph_context(&bundle.graph)),
        ];
        if let Some(style) = bundle
            .style
            .as_ref()
            .filter(|s| s.sample_count >= STYLE_MIN_SAMPLES)
        {
            system.push(PromptBlock::cached(format_style_profile(style)));
        }
        system.push(PromptBlock::plain(RESPONSE_GUIDELINES));

        let mut messages: Vec<ChatMessage> = bundle
            .history
            .iter()
            // The inbound message is already in history by the time we
            // generate; it is re-added below as the final user turn.
            .filter(|turn| turn.id != msg.id)
            .map(|turn| ChatMessage {
                role: match turn.role {
                    TurnRole::User => Role::User,
                    TurnRole::Assistant => Role::Assistant,
                },
                content: turn.content.clone(),
            })
            .collect();
        messages.push(ChatMessage {
            role: Role::User,
            content: msg.content.clone(),
        });

        ChatRequest {
            model: self.model.clone(),
            system,
            messages,
            max_tokens: SUBSTANTIVE_MAX_TOKENS,
        }
    }
}

fn persona_block(bundle: &ContextBundle) -> String {
    let persona = &bundle.persona;
    let mut out = format!(
        "## Persona: {}\nTone: {}\n{}",
        persona.name, persona.tone, persona.style_guide
    );
    if !persona.example_messages.is_empty() {
        out.push_str("\n\nExamples of your messages:");
        for example in &persona.example_messages {
            out.push_str("\n- ");
            out.push_str(example);
        }
    }
    out
}

fn format_graph_context(graph: &GraphContext) -> String {
    if graph.is_empty() {
        return "## About this contact\nNothing recorded yet.".to_string();
    }

    let mut out = String::from("## About this contact");
    if let Some(name) = &graph.display_name {
        out.push_str(&format!("\nName: {name}"));
    }
    for (label, entities) in [
        ("People they mention", &graph.people),
        ("Topics", &graph.topics),
        ("Events", &graph.events),
    ] {
        if entities.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{label}:"));
        for entity in entities {
            match &entity.summary {
                Some(summary) => out.push_str(&format!("\n- {} — {}", entity.name, summary)),
                None => out.push_str(&format!("\n- {}", entity.name)),
            }
        }
    }
    out
}

/// Render the style profile as prompt guidance.
///
/// Descriptor thresholds: message length 50/100 chars, emoji frequency
/// 0.2/0.8, formality 0.3/0.7. Up to three observed greetings and
/// sign-offs are listed verbatim; punctuation quirks become bullet notes.
fn format_style_profile(style: &StyleProfile) -> String {
    let length = if style.avg_message_length < 50.0 {
        "short"
    } else if style.avg_message_length < 100.0 {
        "medium-length"
    } else {
        "long"
    };
    let emoji = if style.emoji_frequency < 0.2 {
        "rarely uses emoji"
    } else if style.emoji_frequency <= 0.8 {
        "sometimes uses emoji"
    } else {
        "uses emoji in most messages"
    };
    let formality = if style.formality_score < 0.3 {
        "casual"
    } else if style.formality_score < 0.7 {
        "neutral"
    } else {
        "formal"
    };

    let mut out = format!(
        "## How you usually write to this contact\n\
         Messages are {length}, {formality} in register, and the writer {emoji}."
    );

    if !style.greeting_style.is_empty() {
        let greetings: Vec<&str> = style
            .greeting_style
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        out.push_str(&format!("\nTypical greetings: {}", greetings.join(", ")));
    }
    if !style.sign_off_style.is_empty() {
        let sign_offs: Vec<&str> = style
            .sign_off_style
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        out.push_str(&format!("\nTypical sign-offs: {}", sign_offs.join(", ")));
    }

    let p = &style.punctuation_style;
    if p.ellipsis_frequency > 0.3 {
        out.push_str("\n- often trails off with ellipses…");
    }
    if p.exclamation_frequency > 0.3 {
        out.push_str("\n- frequently ends sentences with exclamation marks");
    }
    if p.no_ending_period_frequency > 0.5 {
        out.push_str("\n- usually skips the final period");
    }
    out
}

#[cfg(test)]
mod tests {
    use doppel_core::types::{ChannelId, ConversationTurn, NormalizedMessage, TurnKind};
    use doppel_memory::types::{GraphContext, Persona, PunctuationStyle};

    use super::*;

    fn bundle() -> ContextBundle {
        ContextBundle {
            graph: GraphContext::default(),
            persona: Persona::fallback(),
            style: None,
            history: Vec::new(),
        }
    }

    fn msg(content: &str) -> NormalizedMessage {
        NormalizedMessage {
            id: "m9".into(),
            version: 2,
            channel: Some(ChannelId::Telegram),
            contact_id: "1".into(),
            normalized_contact_id: None,
            content: content.into(),
            timestamp_ms: 1,
            media_type: None,
            media_url: None,
            reply_to: None,
            metadata: None,
        }
    }

    fn generator() -> ResponseGenerator {
        struct Never;
        #[async_trait::async_trait]
        impl LlmProvider for Never {
            fn name(&self) -> &str {
                "never"
            }
            async fn send(
                &self,
                _req: &ChatRequest,
            ) -> std::result::Result<ChatResponse, doppel_llm::ProviderError> {
                unreachable!("request-shape tests never call the provider")
            }
        }
        ResponseGenerator::new(Arc::new(Never), "big".into(), "small".into())
    }

    #[test]
    fn substantive_prompt_has_all_blocks_when_style_present() {
        let mut bundle = bundle();
        let mut style = StyleProfile::new("telegram:1");
        style.sample_count = 10;
        bundle.style = Some(style);

        let req = generator().substantive_request(&bundle, &msg("when works?"));
        assert_eq!(req.model, "big");
        // preamble, persona, graph, style, guidelines
        assert_eq!(req.system.len(), 5);
        assert!(!req.system[0].cacheable);
        assert!(req.system[1].cacheable);
        assert!(req.system[2].cacheable);
        assert!(req.system[3].cacheable);
        assert!(!req.system[4].cacheable);
    }

    #[test]
    fn style_block_omitted_below_sample_gate() {
        let mut bundle = bundle();
        let mut style = StyleProfile::new("telegram:1");
        style.sample_count = 9;
        bundle.style = Some(style);

        let req = generator().substantive_request(&bundle, &msg("when works?"));
        assert_eq!(req.system.len(), 4);
    }

    #[test]
    fn history_precedes_current_message_without_duplication() {
        let mut bundle = bundle();
        bundle.history = vec![
            ConversationTurn {
                id: "m1".into(),
                role: TurnRole::User,
                kind: TurnKind::Incoming,
                content: "earlier question".into(),
                timestamp_ms: 1,
            },
            ConversationTurn {
                id: "m2".into(),
                role: TurnRole::Assistant,
                kind: TurnKind::Outgoing,
                content: "earlier answer".into(),
                timestamp_ms: 2,
            },
            // The inbound message itself, already appended to history.
            ConversationTurn {
                id: "m9".into(),
                role: TurnRole::User,
                kind: TurnKind::Incoming,
                content: "when works?".into(),
                timestamp_ms: 3,
            },
        ];

        let req = generator().substantive_request(&bundle, &msg("when works?"));
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[0].content, "earlier question");
        assert_eq!(req.messages[2].content, "when works?");
        assert!(matches!(req.messages[2].role, Role::User));
    }

    #[test]
    fn phatic_prompt_skips_history_and_graph() {
        let mut bundle = bundle();
        bundle.history = vec![ConversationTurn {
            id: "m1".into(),
            role: TurnRole::User,
            kind: TurnKind::Incoming,
            content: "earlier".into(),
            timestamp_ms: 1,
        }];
        let req = generator().phatic_request(&bundle, &msg("ok"));
        assert_eq!(req.model, "small");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.system.len(), 3);
    }

    #[test]
    fn style_descriptors_follow_thresholds() {
        let mut style = StyleProfile::new("telegram:1");
        style.sample_count = 20;
        style.avg_message_length = 30.0;
        style.emoji_frequency = 0.9;
        style.formality_score = 0.1;
        style.greeting_style = vec!["hey".into(), "yo".into(), "hi".into(), "hello".into()];
        style.punctuation_style = PunctuationStyle {
            ellipsis_frequency: 0.4,
            exclamation_frequency: 0.1,
            no_ending_period_frequency: 0.9,
        };

        let text = format_style_profile(&style);
        assert!(text.contains("short"));
        assert!(text.contains("casual"));
        assert!(text.contains("most messages"));
        // Only three greetings listed.
        assert!(text.contains("hey, yo, hi"));
        assert!(!text.contains("hello"));
        assert!(text.contains("ellipses"));
        assert!(!text.contains("exclamation"));
        assert!(text.contains("skips the final period"));
    }
}
