use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One ordered block of the system prompt.
///
/// Blocks are passed opaquely to the provider; `cacheable` marks a cache
/// breakpoint for providers that support prompt caching. Block order is
/// stable across requests so cached prefixes actually hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBlock {
    pub text: String,
    pub cacheable: bool,
}

impl PromptBlock {
    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cacheable: true,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cacheable: false,
        }
    }
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Ordered system prompt blocks (see [`PromptBlock`]).
    pub system: Vec<PromptBlock>,
    /// Conversation history; the current inbound message is the last
    /// `User` entry.
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Flatten the system blocks into one string (providers without
    /// caching, logging).
    pub fn system_plain(&self) -> String {
        self.system
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Token accounting split the way the stats store records it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
    pub cache_read: u32,
    pub cache_write: u32,
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub stop_reason: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// An LLM backend able to answer a chat request.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_plain_joins_blocks_in_order() {
        let req = ChatRequest {
            model: "m".into(),
            system: vec![PromptBlock::plain("first"), PromptBlock::cached("second")],
            messages: Vec::new(),
            max_tokens: 100,
        };
        assert_eq!(req.system_plain(), "first\n\nsecond");
    }
}
