//! Client → server messages (§6), discriminated by `type`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Connect,
    Ping {
        timestamp: i64,
    },
    Message {
        content: String,
        #[serde(rename = "type", default)]
        kind: Option<crate::message::MessageType>,
        #[serde(default)]
        mentions: Vec<String>,
        #[serde(default)]
        mentions_ai: bool,
        reply_to: Option<String>,
        file_data: Option<crate::message::FileData>,
        voice_data: Option<crate::message::VoiceData>,
        code_data: Option<crate::message::CodeData>,
        image_data: Option<crate::message::ImageData>,
    },
    Typing {
        is_typing: bool,
    },
    Status {
        status: String,
    },
    EditMessage {
        message_id: String,
        content: String,
    },
    DeleteMessage {
        message_id: String,
    },
    Reaction {
        message_id: String,
        emoji: String,
        action: ReactionAction,
    },
    Invite {
        user_id: String,
        user_name: String,
        role: relayhub_core::Role,
    },
    Kick {
        user_id: String,
        reason: Option<String>,
    },
    ChangeRole {
        user_id: String,
        new_role: relayhub_core::Role,
    },
    ShareFile {
        file_name: String,
        file_size: u64,
        mime_type: String,
        content: String,
    },
    GetHistory {
        before: Option<String>,
        #[serde(default = "default_history_limit")]
        limit: usize,
    },
    Summarize,
    ClearAiMemory,
    VerifyPassword {
        answer: String,
    },
    SetPassword {
        question: String,
        answer: String,
    },
    VoiceJoin,
    VoiceLeave,
    VoiceStartSpeaking,
    VoiceStopSpeaking,
    VoiceContinuousAudio {
        audio_data: String,
        is_speech: bool,
    },
    VoiceAiAnalyze,
    SharedAiJoin {
        voice_type: Option<String>,
        files: Option<Vec<String>>,
    },
    SharedAiLeave,
    SharedAiAudio {
        audio_data: String,
        is_speaking: bool,
    },
    SharedAiText {
        text: String,
    },
    SharedAiAddContext {
        file: String,
    },
    AiButtonAsrStart,
    AiButtonAsrAudio {
        audio_data: String,
    },
    AiButtonAsrStop,
    ChatVoiceAiJoin {
        voice_type: Option<String>,
    },
    ChatVoiceAiAudio {
        audio_data: String,
        is_speaking: bool,
    },
    ChatVoiceAiLeave,
    ChatVoiceAiSetMode {
        wake_word_mode: bool,
    },
    ChatVoiceAiSetWakewords {
        wake_words: Vec<String>,
    },
    RefreshDownloadUrl {
        oss_key: String,
        request_id: String,
    },
    TranslateMessage {
        message_id: String,
        text: String,
        target_language: String,
    },
    DeleteFile {
        file_id: String,
    },
    RenameFile {
        file_id: String,
        new_file_name: String,
    },
    ListSessionFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Add,
    Remove,
}

fn default_history_limit() -> usize {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_send() {
        let json = r#"{"type":"message","content":"hello"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Message { content, .. } => assert_eq!(content, "hello"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn decodes_verify_password() {
        let json = r#"{"type":"verify_password","answer":"Blue"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::VerifyPassword { answer } if answer == "Blue"));
    }

    #[test]
    fn get_history_defaults_limit() {
        let json = r#"{"type":"get_history"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::GetHistory { limit, before } => {
                assert_eq!(limit, 50);
                assert!(before.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }
}
