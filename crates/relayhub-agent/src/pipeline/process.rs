//! Agent Loop driver (§4.6) — the single non-streaming pipeline that turns a
//! triggering room message into a persisted assistant reply.
//!
//! Steps: load recent room history → render system prompt + tool catalog →
//! run the tool loop → auto-save side channel when the room has grown large
//! → trigger the Summary Manager when context has grown large → return the
//! final reply text for the caller to post back into the room.

use std::sync::Arc;

use tracing::info;

use relayhub_protocol::ChatMessage;

use crate::pipeline::context::AgentContext;
use crate::pipeline::summary;
use crate::prompt::SessionInfo;
use crate::provider::{ChatRequest, Message, ProviderError, Role};
use crate::tools::{build, tool_loop};

/// Number of recent room messages fetched as conversation context per turn.
pub const HISTORY_LIMIT: usize = 40;

/// Result of a completed non-streaming pipeline turn.
pub struct ProcessedMessage {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
}

/// Run the full non-streaming agent loop for one triggering message in `room_id`.
///
/// `trigger` is the message that caused the dispatch (an @mention). `history`
/// is the room's recent messages, newest-last, already fetched by the caller
/// via `RoomHub::get_history`.
pub async fn process_message(
    ctx: &Arc<AgentContext>,
    prompt_builder: &crate::prompt::PromptBuilder,
    room_id: relayhub_core::RoomId,
    history: &[ChatMessage],
    trigger: &ChatMessage,
) -> Result<ProcessedMessage, ProviderError> {
    maybe_auto_save(ctx, &room_id, history).await;

    let tools = build::build_tools(ctx, room_id.clone());
    let tool_defs = build::tool_definitions(&tools);
    let tool_defs_text = crate::tools::render_tool_defs(&tools);

    let prior_summary = ctx.store.get_summary(room_id.as_str()).await.ok().flatten();
    let now = chrono::Utc::now();
    let session_info = SessionInfo { room_id: room_id.as_str().to_string(), turn_count: history.len() as u32, timestamp: now.format("%Y-%m-%d %H:%M UTC").to_string() };

    let mut system_prompt = prompt_builder.build_prompt(prior_summary.as_ref().map(|s| s.summary.as_str()), Some(&session_info));
    if !tool_defs_text.is_empty() {
        system_prompt.static_tier.push_str("\n\n## Available tools\n");
        system_prompt.static_tier.push_str(&tool_defs_text);
    }
    let plain = system_prompt.to_plain_text();

    let mut messages: Vec<Message> = history
        .iter()
        .map(|m| Message {
            role: if m.sender_role == relayhub_core::Role::Ai { Role::Assistant } else { Role::User },
            content: format_envelope(&m.sender_name, &m.timestamp, &m.content),
        })
        .collect();

    messages.push(Message { role: Role::User, content: format_envelope(&trigger.sender_name, &trigger.timestamp, &trigger.content) });

    let combined_len: usize = plain.len() + messages.iter().map(|m| m.content.len()).sum::<usize>();

    let request = ChatRequest {
        model: ctx.model.clone(),
        system: plain,
        system_prompt: Some(system_prompt),
        messages,
        max_tokens: 4096,
        thinking: None,
        tools: tool_defs,
        raw_messages: None,
    };

    let response = tool_loop::run_tool_loop(ctx.llm.as_ref(), request, &tools, ctx.max_iterations, &trigger.content).await?;

    info!(
        model = %response.model,
        stop_reason = %response.stop_reason,
        room = %room_id,
        "pipeline: agent loop complete"
    );

    if summary::needs_summary(combined_len) {
        let ctx_clone = Arc::clone(ctx);
        let room_clone = room_id.clone();
        let history_owned: Vec<ChatMessage> = history.to_vec();
        tokio::spawn(async move {
            summary::summarize_room(&room_clone, &history_owned, ctx_clone.llm.as_ref(), &ctx_clone.store, &ctx_clone.blob).await;
        });
    }

    Ok(ProcessedMessage {
        content: response.content,
        model: response.model,
        tokens_in: response.tokens_in,
        tokens_out: response.tokens_out,
        stop_reason: response.stop_reason,
    })
}

/// Auto-save side channel (§4.6): when the room has accumulated more history
/// than `auto_save_threshold`, save it to a downloadable artifact so the
/// agent loop's working context can be trimmed without losing the record.
async fn maybe_auto_save(ctx: &Arc<AgentContext>, room_id: &relayhub_core::RoomId, history: &[ChatMessage]) {
    if history.len() < ctx.auto_save_threshold {
        return;
    }

    let safe = relayhub_blob::safe_name(&format!("autosave_{}.md", chrono::Utc::now().format("%Y%m%dT%H%M%SZ")));
    let key = relayhub_blob::object_key(room_id.as_str(), "agent", &safe);
    let transcript = crate::tools::save_chat_history::render_transcript(history);

    if let Err(e) = ctx.blob.upload_bytes(&key, transcript.as_bytes(), "text/markdown").await {
        tracing::warn!(error = %e, room = %room_id, "auto-save: failed to archive history");
    }
}

/// Wrap a message with a sender+timestamp envelope so the LLM can reason
/// about ordering and authorship across a multiplayer room.
fn format_envelope(sender: &str, timestamp: &str, content: &str) -> String {
    format!("[{sender} {timestamp}] {content}")
}
