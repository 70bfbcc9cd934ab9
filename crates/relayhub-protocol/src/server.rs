//! Server → client events (§6), discriminated by `type`.

use crate::frames::ErrorShape;
use crate::message::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in a `session.files` listing (§4.12's `list_session_files`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "connection.established")]
    ConnectionEstablished { participants: Vec<Value> },
    #[serde(rename = "connection.pong")]
    ConnectionPong {
        client_timestamp: i64,
        server_timestamp: i64,
    },
    #[serde(rename = "message.new")]
    MessageNew { message: ChatMessage },
    #[serde(rename = "message.updated")]
    MessageUpdated { message: ChatMessage },
    #[serde(rename = "message.deleted")]
    MessageDeleted { message_id: String },
    #[serde(rename = "message.reaction")]
    MessageReaction {
        message_id: String,
        emoji: String,
        user_id: String,
        action: crate::client::ReactionAction,
    },
    #[serde(rename = "user.joined")]
    UserJoined { user_id: String, user_name: String },
    #[serde(rename = "user.left")]
    UserLeft { user_id: String },
    #[serde(rename = "user.status_changed")]
    UserStatusChanged { user_id: String, status: String },
    #[serde(rename = "user.invited")]
    UserInvited { user_id: String, user_name: String },
    #[serde(rename = "user.kicked")]
    UserKicked {
        user_id: String,
        reason: Option<String>,
    },
    #[serde(rename = "user.role_changed")]
    UserRoleChanged {
        user_id: String,
        new_role: relayhub_core::Role,
    },
    #[serde(rename = "typing.start")]
    TypingStart { user_id: String },
    #[serde(rename = "typing.stop")]
    TypingStop { user_id: String },
    #[serde(rename = "ai.thinking")]
    AiThinking { text: String },
    #[serde(rename = "ai.response")]
    AiResponse { message: ChatMessage },
    #[serde(rename = "ai.tool_call")]
    AiToolCall {
        call_id: String,
        name: String,
        args: Value,
    },
    #[serde(rename = "ai.task_plan")]
    AiTaskPlan { plan: Value },
    #[serde(rename = "ai.task_update")]
    AiTaskUpdate { update: Value },
    #[serde(rename = "ai.memory_cleared")]
    AiMemoryCleared,
    #[serde(rename = "voice.transcribing")]
    VoiceTranscribing { user_id: String },
    #[serde(rename = "voice.transcribed")]
    VoiceTranscribed { user_id: String, text: String },
    #[serde(rename = "voice.transcript")]
    VoiceTranscript {
        user_id: String,
        text: String,
        interim: bool,
    },
    #[serde(rename = "voice.transcript.final")]
    VoiceTranscriptFinal { user_id: String, text: String },
    #[serde(rename = "voice.ai_analyze")]
    VoiceAiAnalyze { result: Value },
    #[serde(rename = "voice.asr_ready")]
    VoiceAsrReady,
    #[serde(rename = "voice.audio")]
    VoiceAudio {
        user_id: String,
        user_name: String,
        audio_base64: String,
        is_speech: bool,
        timestamp: i64,
    },
    #[serde(rename = "shared_ai.started")]
    SharedAiStarted { voice_type: Option<String> },
    #[serde(rename = "shared_ai.joined")]
    SharedAiJoined { user_id: String, user_name: String },
    #[serde(rename = "shared_ai.left")]
    SharedAiLeft { user_id: String },
    #[serde(rename = "shared_ai.state")]
    SharedAiState { wake_word_detected: bool },
    #[serde(rename = "shared_ai.asr")]
    SharedAiAsr {
        user_id: String,
        user_name: String,
        text: String,
        interim: bool,
    },
    #[serde(rename = "shared_ai.response")]
    SharedAiResponse { text: String, speaker_id: String },
    #[serde(rename = "shared_ai.audio")]
    SharedAiAudio { audio_base64: String },
    #[serde(rename = "shared_ai.user_audio")]
    SharedAiUserAudio {
        user_id: String,
        user_name: String,
        audio_base64: String,
        is_speech: bool,
        timestamp: i64,
    },
    #[serde(rename = "shared_ai.summary")]
    SharedAiSummary { summary: String },
    #[serde(rename = "shared_ai.error")]
    SharedAiError { message: String },
    #[serde(rename = "history.loaded")]
    HistoryLoaded { messages: Vec<ChatMessage> },
    #[serde(rename = "password.required")]
    PasswordRequired { question: String },
    #[serde(rename = "password.incorrect")]
    PasswordIncorrect,
    #[serde(rename = "password.set")]
    PasswordSet,
    #[serde(rename = "file.shared")]
    FileShared { file_id: String, url: String },
    #[serde(rename = "file.deleted")]
    FileDeleted { file_id: String },
    #[serde(rename = "file.renamed")]
    FileRenamed { file_id: String, new_file_name: String },
    #[serde(rename = "session.files")]
    SessionFiles { files: Vec<FileInfo> },
    #[serde(rename = "download_url_refreshed")]
    DownloadUrlRefreshed { request_id: String, url: String },
    #[serde(rename = "translation_result")]
    TranslationResult {
        message_id: String,
        translated: String,
    },
    #[serde(rename = "translation_error")]
    TranslationError { message_id: String, error: String },
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<crate::frames::ErrorDetails>,
    },
}

impl ServerEvent {
    pub fn error(err: &relayhub_core::HubError) -> Self {
        let shape = ErrorShape::new(err.to_string(), err.code());
        ServerEvent::Error {
            message: shape.message,
            details: shape.details,
        }
    }
}
