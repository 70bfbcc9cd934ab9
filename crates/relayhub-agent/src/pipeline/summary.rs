//! Summary Manager (§4.7) — condenses a room's conversation once combined
//! context length crosses `SUMMARY_THRESHOLD_CHARS`, so long-running rooms
//! stay within the agent's working context without losing continuity.
//!
//! Replaces the Haiku fact-extraction-into-user-memory design: there is no
//! per-user memory store here, just a per-room rolling summary persisted
//! through `MessageStore` and archived as a markdown artifact in blob
//! storage.

use std::sync::Arc;

use tracing::{info, warn};

use relayhub_blob::BlobStore;
use relayhub_core::config::SUMMARY_THRESHOLD_CHARS;
use relayhub_core::RoomId;
use relayhub_store::{ConversationSummaryRecord, MessageStore};

use crate::provider::{ChatRequest, LlmClient, Message, Role};

const SUMMARY_MODEL: &str = "claude-haiku-4-5-20251001";

const SUMMARY_SYSTEM_PROMPT: &str = concat!(
    "You maintain a rolling summary of a multiplayer chat room for an AI participant. ",
    "Given the prior summary (if any) and a batch of new messages, produce an updated ",
    "summary covering: topics discussed, decisions made, open action items, and key ",
    "resources or files mentioned. Be concise — plain prose, no preamble, no headers ",
    "beyond the four listed above."
);

/// Returns `true` if `combined_len` (prior summary + pending transcript, in
/// characters) exceeds the threshold at which a fresh summary should run.
pub fn needs_summary(combined_len: usize) -> bool {
    combined_len > SUMMARY_THRESHOLD_CHARS
}

/// Summarize `messages` against any prior stored summary for `room_id`,
/// persist the updated summary via `store`, and archive it as a markdown
/// artifact via `blob`. Fire-and-forget from the caller's perspective — a
/// failure here never blocks the chat turn that triggered it.
pub async fn summarize_room(
    room_id: &RoomId,
    messages: &[relayhub_protocol::ChatMessage],
    llm: &dyn LlmClient,
    store: &Arc<dyn MessageStore>,
    blob: &Arc<dyn BlobStore>,
) {
    if messages.is_empty() {
        return;
    }

    let prior = match store.get_summary(room_id.as_str()).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, room = %room_id, "summary: failed to load prior summary");
            None
        }
    };

    let transcript: String = messages
        .iter()
        .map(|m| format!("{}: {}", m.sender_name, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let mut user_turn = String::new();
    if let Some(ref prev) = prior {
        user_turn.push_str("Prior summary:\n");
        user_turn.push_str(&prev.summary);
        user_turn.push_str("\n\n");
    }
    user_turn.push_str("New messages:\n");
    user_turn.push_str(&transcript);

    let req = ChatRequest {
        model: SUMMARY_MODEL.to_string(),
        system: SUMMARY_SYSTEM_PROMPT.to_string(),
        system_prompt: None,
        messages: vec![Message { role: Role::User, content: user_turn }],
        max_tokens: 1024,
        thinking: None,
        tools: Vec::new(),
        raw_messages: None,
    };

    let response = match llm.send(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, room = %room_id, "summary: LLM call failed");
            return;
        }
    };

    let summary_text = response.content.trim().to_string();
    if summary_text.is_empty() {
        return;
    }

    let last = messages.last().expect("checked non-empty above");
    let record = ConversationSummaryRecord {
        room_id: room_id.as_str().to_string(),
        summary: summary_text.clone(),
        message_count: messages.len() as u64,
        last_message_id: Some(last.id.clone()),
        last_message_timestamp: Some(last.timestamp.clone()),
    };

    if let Err(e) = store.upsert_summary(&record).await {
        warn!(error = %e, room = %room_id, "summary: failed to persist summary record");
    }

    let safe = relayhub_blob::safe_name(&format!("summary_{}.md", chrono::Utc::now().format("%Y%m%dT%H%M%SZ")));
    let key = format!("summaries/{}/{}", room_id.as_str(), safe);
    match blob.upload_bytes(&key, summary_text.as_bytes(), "text/markdown").await {
        Ok(_) => info!(room = %room_id, "summary: archived to blob storage"),
        Err(e) => warn!(error = %e, room = %room_id, "summary: failed to archive to blob storage"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundary() {
        assert!(!needs_summary(SUMMARY_THRESHOLD_CHARS));
        assert!(needs_summary(SUMMARY_THRESHOLD_CHARS + 1));
    }
}
