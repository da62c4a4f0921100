use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{
    ChatRequest, ChatResponse, LlmProvider, ProviderError, TokenUsage,
};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role,
                "content": m.content,
            })
        })
        .collect();

    // Each cacheable block becomes a cache breakpoint; volatile blocks are
    // passed without cache_control so they never break the cached prefix
    // of the blocks before them.
    let system: Vec<serde_json::Value> = req
        .system
        .iter()
        .filter(|b| !b.text.is_empty())
        .map(|b| {
            if b.cacheable {
                serde_json::json!({
                    "type": "text",
                    "text": b.text,
                    "cache_control": { "type": "ephemeral" }
                })
            } else {
                serde_json::json!({
                    "type": "text",
                    "text": b.text,
                })
            }
        })
        .collect();

    serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "system": system,
        "messages": messages,
        "stream": false,
    })
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    let content = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Unknown => None,
        })
        .collect::<Vec<_>>()
        .join("");

    ChatResponse {
        content,
        model: resp.model,
        usage: TokenUsage {
            input: resp.usage.input_tokens,
            output: resp.usage.output_tokens,
            cache_read: resp.usage.cache_read_input_tokens.unwrap_or(0),
            cache_write: resp.usage.cache_creation_input_tokens.unwrap_or(0),
        },
        stop_reason: resp.stop_reason.unwrap_or_default(),
    }
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
    cache_creation_input_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatMessage, PromptBlock, Role};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "claude-sonnet-4-5".into(),
            system: vec![
                PromptBlock::plain("You reply as the operator."),
                PromptBlock::cached("Persona: warm, terse."),
                PromptBlock::plain(""),
            ],
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hi".into(),
            }],
            max_tokens: 512,
        }
    }

    #[test]
    fn cacheable_blocks_carry_cache_control() {
        let body = build_request_body(&request());
        let system = body["system"].as_array().unwrap();
        // Empty blocks are dropped.
        assert_eq!(system.len(), 2);
        assert!(system[0].get("cache_control").is_none());
        assert_eq!(system[1]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn usage_parses_cache_token_fields() {
        let json = r#"{
            "model": "claude-sonnet-4-5",
            "content": [{"type": "text", "text": "hello"}],
            "stop_reason": "end_turn",
            "usage": {
                "input_tokens": 100,
                "output_tokens": 20,
                "cache_creation_input_tokens": 40,
                "cache_read_input_tokens": 300
            }
        }"#;
        let resp: ApiResponse = serde_json::from_str(json).unwrap();
        let parsed = parse_response(resp);
        assert_eq!(parsed.content, "hello");
        assert_eq!(parsed.usage.input, 100);
        assert_eq!(parsed.usage.cache_read, 300);
        assert_eq!(parsed.usage.cache_write, 40);
    }

    #[test]
    fn usage_without_cache_fields_defaults_to_zero() {
        let json = r#"{
            "model": "m",
            "content": [],
            "stop_reason": null,
            "usage": {"input_tokens": 1, "output_tokens": 2}
        }"#;
        let resp: ApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parse_response(resp).usage.cache_read, 0);
    }
}
