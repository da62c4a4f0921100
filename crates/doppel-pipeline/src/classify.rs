//! Phatic vs. substantive routing.
//!
//! A heuristic fast path answers the common cases without an LLM call;
//! only ambiguous content goes to the small classifier model. On any
//! provider failure the message defaults to substantive — over-answering
//! is cheaper than ignoring a real question.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use doppel_llm::{ChatMessage, ChatRequest, LlmProvider, PromptBlock, Role, TokenUsage};

/// How a message is routed through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Short acknowledgement — answered from persona alone.
    Phatic,
    /// Anything that merits context assembly.
    Substantive,
}

/// Result of classification; `usage` is set only when the LLM was consulted.
#[derive(Debug, Clone)]
pub struct ClassifyOutcome {
    pub class: MessageClass,
    pub usage: Option<TokenUsage>,
}

/// Bound on the LLM classification call.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Acknowledgement tokens matched exactly (after trim + lowercase).
const ACK_TOKENS: &[&str] = &[
    "ok", "okay", "k", "kk", "sure", "yes", "yep", "yeah", "no", "nope", "nah", "lol", "haha",
    "thanks", "thank you", "thx", "ty", "cool", "nice", "great", "got it", "sounds good", "np",
    "bye", "gn", "gm", "good night", "good morning", "hm", "hmm",
];

/// Interrogative head words — a two-token message starting with one of
/// these is a question even without a question mark.
const INTERROGATIVES: &[&str] = &[
    "who", "what", "when", "where", "why", "how", "which", "can", "could", "would", "will",
    "should", "shall", "do", "does", "did", "is", "are", "am",
];

/// Heuristic fast path. `None` means the heuristics cannot decide.
pub fn classify_fast(content: &str) -> Option<MessageClass> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Some(MessageClass::Phatic);
    }

    if is_emoji_only(trimmed) && trimmed.chars().count() <= 10 {
        return Some(MessageClass::Phatic);
    }

    let lowered = trimmed.to_lowercase();
    if ACK_TOKENS.contains(&lowered.as_str()) {
        return Some(MessageClass::Phatic);
    }

    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    if tokens.len() <= 2
        && !lowered.contains('?')
        && !tokens
            .first()
            .map(|t| INTERROGATIVES.contains(t))
            .unwrap_or(false)
    {
        return Some(MessageClass::Phatic);
    }

    if lowered.contains('?') {
        return Some(MessageClass::Substantive);
    }

    None
}

/// True when every non-whitespace char is emoji-ish (pictographs, symbols,
/// skin tones, ZWJ sequences, variation selectors).
fn is_emoji_only(s: &str) -> bool {
    let mut saw_emoji = false;
    for c in s.chars() {
        if c.is_whitespace() {
            continue;
        }
        if is_emoji_char(c) {
            saw_emoji = true;
        } else {
            return false;
        }
    }
    saw_emoji
}

fn is_emoji_char(c: char) -> bool {
    matches!(u32::from(c),
        0x1F300..=0x1FAFF   // pictographs, emoticons, transport, supplemental
        | 0x2600..=0x27BF   // misc symbols + dingbats
        | 0x2B00..=0x2BFF   // arrows/stars (⭐)
        | 0x1F1E6..=0x1F1FF // regional indicators
        | 0x1F3FB..=0x1F3FF // skin tones
        | 0xFE0F            // variation selector
        | 0x200D            // zero-width joiner
        | 0x2764            // heavy black heart
    )
}

/// Classifier with the heuristic fast path and an LLM fallback.
pub struct Classifier {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl Classifier {
    pub fn new(provider: Arc<dyn LlmProvider>, model: String) -> Self {
        Self { provider, model }
    }

    pub async fn classify(&self, content: &str) -> ClassifyOutcome {
        if let Some(class) = classify_fast(content) {
            debug!(?class, "classified via fast path");
            return ClassifyOutcome { class, usage: None };
        }

        let req = ChatRequest {
            model: self.model.clone(),
            system: vec![PromptBlock::plain(
                "You label chat messages. Reply with exactly one word: \
                 \"phatic\" if the message is a social acknowledgement that \
                 needs no information in response, or \"substantive\" if it \
                 asks for or conveys information.",
            )],
            messages: vec![ChatMessage {
                role: Role::User,
                content: content.to_string(),
            }],
            max_tokens: 8,
        };

        match tokio::time::timeout(CLASSIFY_TIMEOUT, self.provider.send(&req)).await {
            Ok(Ok(resp)) => {
                let class = if resp.content.to_lowercase().contains("phatic") {
                    MessageClass::Phatic
                } else {
                    MessageClass::Substantive
                };
                ClassifyOutcome {
                    class,
                    usage: Some(resp.usage),
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "LLM classification failed, defaulting to substantive");
                ClassifyOutcome {
                    class: MessageClass::Substantive,
                    usage: None,
                }
            }
            Err(_) => {
                warn!("LLM classification timed out, defaulting to substantive");
                ClassifyOutcome {
                    class: MessageClass::Substantive,
                    usage: None,
                }
            }
        }
    }
}
