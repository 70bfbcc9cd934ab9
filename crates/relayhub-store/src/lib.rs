//! `MessageStore` port (§4.3, C3) plus a `rusqlite`-backed implementation.

pub mod error;
pub mod sqlite;

use async_trait::async_trait;
pub use error::{Result, StoreError};
use relayhub_protocol::ChatMessage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: String,
    pub session_id: String,
    pub message_id: Option<String>,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub blob_url: String,
    pub blob_key: String,
    pub uploaded_by: String,
    pub uploaded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub role: relayhub_core::Role,
    pub status: String,
    pub joined_at: String,
    pub last_seen: String,
}

/// Durable append-only store for rooms, messages, participants, and files.
///
/// All operations fail with `StoreError::Unavailable` if the backing store
/// is disconnected; callers (the Room Hub) degrade by falling back to the
/// in-memory ring (§4.5 failure semantics).
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn ensure_room(
        &self,
        id: &str,
        name: &str,
        creator: &str,
        pw_question: Option<&str>,
        pw_answer: Option<&str>,
    ) -> Result<()>;

    async fn get_room_password_question(&self, id: &str) -> Result<Option<String>>;

    /// Case-insensitive compare; returns `true` if no password is set.
    async fn verify_room_password(&self, id: &str, answer: &str) -> Result<bool>;

    async fn set_room_password(&self, id: &str, question: &str, answer: &str) -> Result<()>;

    async fn save_message(&self, message: &ChatMessage) -> Result<()>;

    /// Newest-first slice, optionally before a given message id.
    async fn get_messages(
        &self,
        room_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<ChatMessage>>;

    async fn update_message_content(&self, message_id: &str, content: &str, edited_at: &str) -> Result<()>;

    async fn delete_message(&self, message_id: &str) -> Result<()>;

    async fn clear_room_messages(&self, room_id: &str) -> Result<()>;

    async fn save_participant(&self, participant: &ParticipantRecord) -> Result<()>;

    async fn update_participant_status(&self, room_id: &str, user_id: &str, status: &str) -> Result<()>;

    async fn save_file_metadata(&self, file: &FileMetadata) -> Result<()>;

    async fn get_file_by_id(&self, file_id: &str) -> Result<Option<FileMetadata>>;

    async fn get_file_by_message_id(&self, message_id: &str) -> Result<Option<FileMetadata>>;

    async fn rename_file(&self, file_id: &str, new_name: &str) -> Result<()>;

    async fn delete_file(&self, file_id: &str) -> Result<()>;

    async fn get_room_files(&self, room_id: &str) -> Result<Vec<FileMetadata>>;

    async fn upsert_summary(&self, summary: &ConversationSummaryRecord) -> Result<()>;

    async fn get_summary(&self, room_id: &str) -> Result<Option<ConversationSummaryRecord>>;

    async fn delete_summary(&self, room_id: &str) -> Result<()>;

    /// Every room carrying a stored summary, oldest `updated_at` first — the
    /// reaper's delegate for the maxAge/maxCount bound (§4.11 step 4).
    async fn list_summaries_oldest_first(&self) -> Result<Vec<SummaryAge>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummaryRecord {
    pub room_id: String,
    pub summary: String,
    pub message_count: u64,
    pub last_message_id: Option<String>,
    pub last_message_timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryAge {
    pub room_id: String,
    pub updated_at: String,
}
