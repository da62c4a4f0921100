pub mod anthropic;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use provider::{
    ChatMessage, ChatRequest, ChatResponse, LlmProvider, PromptBlock, ProviderError, Role,
    TokenUsage,
};
