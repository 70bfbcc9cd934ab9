//! Wire-level `ChatMessage` shape and its typed payload variants (§3, §6).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Voice,
    File,
    Code,
    System,
    AiThinking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileData {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceData {
    pub duration_ms: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeData {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// At most one of these accompanies a `ChatMessage` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    File(FileData),
    Voice(VoiceData),
    Code(CodeData),
    Image(ImageData),
}

/// Immutable once accepted by the Room Hub; edits/deletes are separate ops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: relayhub_core::Role,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    #[serde(default)]
    pub mentions: HashSet<String>,
    pub mentions_ai: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub payload: Option<MessagePayload>,
}
