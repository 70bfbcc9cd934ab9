//! The one concrete `LlmClient` this crate ships. Grounded on the reference
//! agent crate's Anthropic adapter; OAuth token exchange and the SSE
//! streaming path are dropped — the hub only ever needs a single completed
//! response per agent-loop iteration (§4.6).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmClient, ProviderError, ToolCall};
use crate::thinking::ThinkingLevel;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
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
            .header("anthropic-version", API_VERSION)
            .header("x-api-key", &self.api_key)
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
            return Err(ProviderError::RateLimited { retry_after_ms: retry });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::Api { status, message: text });
        }

        let api_resp: ApiResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut messages: Vec<serde_json::Value> = if let Some(ref raw) = req.raw_messages {
        raw.clone()
    } else {
        req.messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect()
    };

    // The API rejects requests carrying thinking blocks from prior turns.
    crate::thinking::strip_thinking_blocks(&mut messages);

    let system: serde_json::Value = if let Some(ref prompt) = req.system_prompt {
        serde_json::Value::Array(prompt.to_anthropic_blocks())
    } else {
        serde_json::Value::String(req.system.clone())
    };

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "system": system,
        "messages": messages,
        "stream": false,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| serde_json::json!({ "name": t.name, "description": t.description, "input_schema": t.input_schema }))
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    if let Some(level) = req.thinking {
        if level != ThinkingLevel::Off {
            body["thinking"] = serde_json::json!({ "type": "enabled", "budget_tokens": level.budget_tokens() });
        }
    }

    body
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall { id, name, input }),
            _ => {}
        }
    }

    ChatResponse {
        content: text_parts.join(""),
        model: resp.model,
        tokens_in: resp.usage.input_tokens,
        tokens_out: resp.usage.output_tokens,
        stop_reason: resp.stop_reason.unwrap_or_default(),
        tool_calls,
    }
}

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
    #[serde(rename = "thinking")]
    #[allow(dead_code)]
    Thinking { thinking: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: serde_json::Value },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}
