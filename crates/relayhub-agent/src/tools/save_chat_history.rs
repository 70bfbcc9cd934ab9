//! Tool: save_chat_history — serializes recent room history to a blob-store
//! artifact and returns its download URL (§4.6.1). Also the backing action
//! for the auto-save side channel (§4.6).

use std::sync::Arc;

use async_trait::async_trait;
use relayhub_blob::BlobStore;
use relayhub_core::RoomId;
use relayhub_room::hub::RoomHub;

use super::{Tool, ToolResult};

const DEFAULT_HISTORY_LIMIT: usize = 200;

pub struct SaveChatHistoryTool {
    room_id: RoomId,
    room_hub: Arc<RoomHub>,
    blob: Arc<dyn BlobStore>,
}

impl SaveChatHistoryTool {
    pub fn new(room_id: RoomId, room_hub: Arc<RoomHub>, blob: Arc<dyn BlobStore>) -> Self {
        Self { room_id, room_hub, blob }
    }
}

/// Renders a history slice as a flat, human-readable transcript.
pub fn render_transcript(messages: &[relayhub_protocol::ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("[{} {:?}] {}: {}", m.timestamp, m.kind, m.sender_name, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for SaveChatHistoryTool {
    fn name(&self) -> &str {
        "save_chat_history"
    }

    fn description(&self) -> &str {
        "Export the recent chat history of this room to a downloadable file and \
         return its URL."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of messages to export (default 200)."
                }
            }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let limit = input.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize).unwrap_or(DEFAULT_HISTORY_LIMIT);

        let messages = self.room_hub.get_history(&self.room_id, limit, None).await;
        if messages.is_empty() {
            return ToolResult::success("Room has no history to export yet.");
        }

        let transcript = render_transcript(&messages);
        let safe = relayhub_blob::safe_name(&format!("chat_history_{}.md", chrono::Utc::now().format("%Y%m%dT%H%M%SZ")));
        let key = relayhub_blob::object_key(self.room_id.as_str(), "agent", &safe);

        match self.blob.upload_bytes(&key, transcript.as_bytes(), "text/markdown").await {
            Ok(url) => ToolResult::success(format!("Saved {} messages. Download: {}", messages.len(), url)),
            Err(e) => ToolResult::error(format!("failed to save chat history: {e}")),
        }
    }
}
