//! Tool execution loop — the core agentic behavior (§4.6).
//!
//! Flow: prompt → LLM → if tool_use → execute tools → inject results → LLM → repeat.
//! Stops when: stop_reason is not "tool_use", no further progress is possible,
//! or the configured iteration budget is exhausted.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::heuristics::{classify_user_message, looks_like_refusal};
use crate::provider::{ChatRequest, ChatResponse, LlmClient, ToolCall};

use super::{Tool, ToolResult};

const FALLBACK_APOLOGY: &str =
    "I wasn't able to finish that within my step budget. Could you narrow the request or try again?";

/// Run the full tool execution loop (non-streaming).
///
/// Starts from `initial_request`, which must have `messages` or `raw_messages` set.
/// `user_message` is the triggering message's plain text, used once by the
/// forced-tool heuristic on the first tool-call-free response.
/// Returns the final `ChatResponse` (the one with `stop_reason != "tool_use"`).
pub async fn run_tool_loop(
    client: &dyn LlmClient,
    initial_request: ChatRequest,
    tools: &[Box<dyn Tool>],
    max_iterations: usize,
    user_message: &str,
) -> Result<ChatResponse, crate::provider::ProviderError> {
    let mut raw_messages: Vec<serde_json::Value> = if let Some(ref raw) = initial_request.raw_messages {
        raw.clone()
    } else {
        initial_request.messages.iter().map(|m| serde_json::json!({ "role": m.role, "content": m.content })).collect()
    };

    let mut last_response: Option<ChatResponse> = None;
    let mut executed_ids: HashSet<String> = HashSet::new();
    let mut heuristic_applied = false;

    for iteration in 0..max_iterations {
        let mut req = initial_request.clone();
        req.raw_messages = Some(raw_messages.clone());

        debug!(iteration, "tool loop iteration");

        let mut response = client.send(&req).await?;

        if response.tool_calls.is_empty() {
            if iteration == 0 && !heuristic_applied {
                heuristic_applied = true;
                if let Some(forced_name) = classify_user_message(user_message) {
                    if looks_like_refusal(&response.content) || response.content.trim().is_empty() {
                        debug!(tool = forced_name, "forcing tool call via heuristic");
                        response.tool_calls.push(ToolCall {
                            id: format!("forced_{forced_name}"),
                            name: forced_name.to_string(),
                            input: serde_json::json!({}),
                        });
                    }
                }
            }

            if response.tool_calls.is_empty() {
                info!(iteration, "tool loop complete — no more tool calls");
                return Ok(response);
            }
        }

        let fresh_calls: Vec<&ToolCall> = response.tool_calls.iter().filter(|c| !executed_ids.contains(&c.id)).collect();

        if fresh_calls.is_empty() {
            warn!(iteration, "no further progress — all tool calls already executed");
            response.stop_reason = "no_further_progress".to_string();
            return Ok(response);
        }

        let mut assistant_content: Vec<serde_json::Value> = Vec::new();

        if !response.content.is_empty() {
            assistant_content.push(serde_json::json!({ "type": "text", "text": response.content }));
        }

        for call in &fresh_calls {
            assistant_content.push(serde_json::json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.input,
            }));
        }

        raw_messages.push(serde_json::json!({ "role": "assistant", "content": assistant_content }));

        let mut tool_result_content: Vec<serde_json::Value> = Vec::new();

        for call in &fresh_calls {
            let result = execute_tool(tools, call).await;
            executed_ids.insert(call.id.clone());
            tool_result_content.push(serde_json::json!({
                "type": "tool_result",
                "tool_use_id": call.id,
                "content": result.content,
                "is_error": result.is_error,
            }));
        }

        raw_messages.push(serde_json::json!({ "role": "user", "content": tool_result_content }));

        last_response = Some(response);
    }

    warn!(max_iterations, "tool loop hit maximum iterations — requesting final summary");

    let mut closing_req = initial_request.clone();
    raw_messages.push(serde_json::json!({
        "role": "user",
        "content": "You're out of steps. Summarize what you accomplished and what remains in one short message.",
    }));
    closing_req.raw_messages = Some(raw_messages);

    match client.send(&closing_req).await {
        Ok(resp) if !resp.content.trim().is_empty() => Ok(resp),
        _ => {
            let mut resp = last_response.unwrap_or_else(|| ChatResponse {
                content: String::new(),
                model: initial_request.model.clone(),
                tokens_in: 0,
                tokens_out: 0,
                tool_calls: Vec::new(),
                stop_reason: "max_iterations".to_string(),
            });
            resp.content = FALLBACK_APOLOGY.to_string();
            resp.tool_calls.clear();
            resp.stop_reason = "max_iterations".to_string();
            Ok(resp)
        }
    }
}

/// Find and execute the named tool. Returns an error ToolResult if not found.
async fn execute_tool(tools: &[Box<dyn Tool>], call: &ToolCall) -> ToolResult {
    match tools.iter().find(|t| t.name() == call.name) {
        Some(tool) => {
            debug!(tool = %call.name, "executing tool");
            tool.execute(call.input.clone()).await
        }
        None => ToolResult::error(format!("unknown tool: {}", call.name)),
    }
}
