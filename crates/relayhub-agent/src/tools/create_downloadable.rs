//! Tool: create_downloadable — writes agent-authored content to a blob-store
//! artifact and returns its download URL (§4.6.1).
//!
//! Bypasses `RoomHub::share_file`, which gates on `Permission::FileAny` —
//! the synthetic AI participant only holds `Permission::MessageSend`.

use std::sync::Arc;

use async_trait::async_trait;
use relayhub_blob::BlobStore;
use relayhub_core::RoomId;

use super::{Tool, ToolResult};

pub struct CreateDownloadableTool {
    room_id: RoomId,
    blob: Arc<dyn BlobStore>,
}

impl CreateDownloadableTool {
    pub fn new(room_id: RoomId, blob: Arc<dyn BlobStore>) -> Self {
        Self { room_id, blob }
    }
}

fn mime_for(file_name: &str) -> &'static str {
    if file_name.ends_with(".md") {
        "text/markdown"
    } else if file_name.ends_with(".json") {
        "application/json"
    } else if file_name.ends_with(".csv") {
        "text/csv"
    } else if file_name.ends_with(".html") {
        "text/html"
    } else {
        "text/plain"
    }
}

#[async_trait]
impl Tool for CreateDownloadableTool {
    fn name(&self) -> &str {
        "create_downloadable"
    }

    fn description(&self) -> &str {
        "Create a file from text content (e.g. a report, a code listing, a data \
         export) and return a download URL for it. Use this instead of pasting \
         long content directly into chat."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_name": {
                    "type": "string",
                    "description": "Desired file name, e.g. 'report.md'."
                },
                "content": {
                    "type": "string",
                    "description": "The full text content of the file."
                }
            },
            "required": ["file_name", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let file_name = match input.get("file_name").and_then(|v| v.as_str()) {
            Some(n) => n,
            None => return ToolResult::error("missing required parameter: file_name"),
        };
        let content = match input.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolResult::error("missing required parameter: content"),
        };
        if content.is_empty() {
            return ToolResult::error("content must not be empty");
        }

        let safe = relayhub_blob::safe_name(file_name);
        let key = relayhub_blob::object_key(self.room_id.as_str(), "agent", &safe);
        let mime = mime_for(&safe);

        match self.blob.upload_bytes(&key, content.as_bytes(), mime).await {
            Ok(url) => ToolResult::success(format!("Created '{safe}'. Download: {url}")),
            Err(e) => ToolResult::error(format!("failed to create downloadable: {e}")),
        }
    }
}
