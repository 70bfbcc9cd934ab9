//! `LlmClient` port (C6): the agent loop's seam onto a text LLM with tool
//! use. One concrete adapter ships in [`crate::anthropic`]; swapping
//! providers means implementing this trait, not touching the loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::prompt::SystemPrompt;
use crate::thinking::ThinkingLevel;

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Request to an LLM.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Plain text system prompt, used when `system_prompt` is absent.
    pub system: String,
    /// 3-tier prompt with cache breakpoints (§4.6 "Render system prompt").
    pub system_prompt: Option<SystemPrompt>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    /// Extended-thinking budget. `None`/`Off` disables the thinking block.
    pub thinking: Option<ThinkingLevel>,
    /// Tools to expose to the LLM. Empty when none are registered.
    pub tools: Vec<ToolDefinition>,
    /// Raw JSON messages built by the tool loop (structured tool_use /
    /// tool_result content blocks can't round-trip through `Message`).
    /// Overrides `messages` when set.
    pub raw_messages: Option<Vec<serde_json::Value>>,
}

/// Response from an LLM.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    /// Tool calls requested by the LLM. Empty when none were made.
    pub tool_calls: Vec<ToolCall>,
}

/// Common interface onto a text LLM with tool use.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a chat request and wait for the full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<ProviderError> for relayhub_core::HubError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::RateLimited { retry_after_ms } => {
                relayhub_core::HubError::UpstreamFailure(format!("rate limited, retry after {retry_after_ms}ms"))
            }
            other => relayhub_core::HubError::UpstreamFailure(other.to_string()),
        }
    }
}
