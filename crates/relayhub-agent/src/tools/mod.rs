//! The fixed tool catalog (§4.6.1): `read_file`, `list_files`,
//! `search_files`, `execute_command`, `save_chat_history`,
//! `create_downloadable`, `capability_probe`.

pub mod build;
pub mod capability_probe;
pub mod create_downloadable;
pub mod execute_command;
pub mod list_files;
pub mod read_file;
pub mod save_chat_history;
pub mod search_files;
pub mod tool_loop;

use async_trait::async_trait;

/// Outcome of a single tool invocation. Errors never abort the agent loop
/// (§4.6 step 4) — they're fed back to the LLM as `{success:false, error}`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: true }
    }
}

/// A tool the agent loop may invoke. `execute` receives the LLM's raw JSON
/// arguments, validated against `input_schema` only by the LLM itself — the
/// tool is responsible for defensive parsing of its own args.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Flattens a tool catalog into the `ToolDefinition` shape an `LlmClient`
/// request carries.
pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<crate::provider::ToolDefinition> {
    tools
        .iter()
        .map(|t| crate::provider::ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

/// Renders a human-readable tool list for Tier 1 of the system prompt.
pub fn render_tool_defs(tools: &[Box<dyn Tool>]) -> String {
    tools
        .iter()
        .map(|t| format!("- `{}`: {}", t.name(), t.description()))
        .collect::<Vec<_>>()
        .join("\n")
}
