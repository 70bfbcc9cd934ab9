//! Routes one admitted connection's inbound [`ClientMessage`] to the Room
//! Hub, the voice stack, or the store/blob/LLM ports directly, for the
//! handful of operations neither of the first two expose (§6).

use std::sync::Arc;

use base64::Engine;
use relayhub_core::config::SUMMARY_MAX_COUNT;
use relayhub_core::{HubError, Role, RoomId, UserId};
use relayhub_permissions::{Permission, PermissionChecker};
use relayhub_protocol::message::MessageType;
use relayhub_protocol::{ClientMessage, FileInfo, ServerEvent};
use relayhub_room::Room;
use tracing::warn;

use crate::app::AppState;

const DOWNLOAD_URL_TTL_SECS: u64 = 3600;

pub async fn handle(msg: ClientMessage, room_id: &RoomId, user_id: &UserId, state: &Arc<AppState>) {
    let Some(room) = state.room_hub.room(room_id) else {
        warn!(room = %room_id, "dispatch: room vanished mid-connection");
        return;
    };
    let user_name = room.user_name_of(user_id).unwrap_or_default();

    match msg {
        ClientMessage::Connect | ClientMessage::VerifyPassword { .. } => {}

        ClientMessage::Ping { timestamp } => {
            room.send_to(
                user_id,
                ServerEvent::ConnectionPong {
                    client_timestamp: timestamp,
                    server_timestamp: chrono::Utc::now().timestamp_millis(),
                },
            );
        }

        ClientMessage::Message {
            content,
            kind,
            mentions,
            mentions_ai,
            reply_to,
            file_data,
            voice_data,
            code_data,
            image_data,
        } => {
            let payload = message_payload(file_data, voice_data, code_data, image_data);
            let kind = kind.unwrap_or(MessageType::Text);
            if let Err(e) = state
                .room_hub
                .send_message(room_id, user_id, content, kind, mentions, mentions_ai, reply_to, payload)
                .await
            {
                room.send_to(user_id, ServerEvent::error(&e));
            }
        }

        ClientMessage::Typing { is_typing } => {
            let event = if is_typing {
                ServerEvent::TypingStart { user_id: user_id.to_string() }
            } else {
                ServerEvent::TypingStop { user_id: user_id.to_string() }
            };
            room.broadcast(event, Some(user_id));
        }

        ClientMessage::Status { status } => {
            room.set_status(user_id, &status);
            room.broadcast(ServerEvent::UserStatusChanged { user_id: user_id.to_string(), status }, Some(user_id));
        }

        ClientMessage::EditMessage { message_id, content } => {
            if let Err(e) = state.room_hub.edit_message(room_id, user_id, &message_id, content).await {
                room.send_to(user_id, ServerEvent::error(&e));
            }
        }

        ClientMessage::DeleteMessage { message_id } => {
            if let Err(e) = state.room_hub.delete_message(room_id, user_id, &message_id).await {
                room.send_to(user_id, ServerEvent::error(&e));
            }
        }

        ClientMessage::Reaction { message_id, emoji, action } => {
            // Ephemeral — reactions aren't persisted, only fanned out live.
            room.broadcast(ServerEvent::MessageReaction { message_id, emoji, user_id: user_id.to_string(), action }, None);
        }

        ClientMessage::Invite { user_id: invitee_id, user_name: invitee_name, role: _role } => {
            if let Err(e) = state.room_hub.invite(room_id, user_id, &invitee_id, &invitee_name) {
                room.send_to(user_id, ServerEvent::error(&e));
            }
        }

        ClientMessage::Kick { user_id: target, reason } => {
            let target = UserId::from(target);
            if let Err(e) = state.room_hub.kick(room_id, user_id, &target, reason).await {
                room.send_to(user_id, ServerEvent::error(&e));
            }
        }

        ClientMessage::ChangeRole { user_id: target, new_role } => {
            let target = UserId::from(target);
            if let Err(e) = state.room_hub.change_role(room_id, user_id, &target, new_role).await {
                room.send_to(user_id, ServerEvent::error(&e));
            }
        }

        ClientMessage::ShareFile { file_name, file_size, mime_type, content } => match decode_audio(&content) {
            Ok(bytes) => {
                if let Err(e) = state.room_hub.share_file(room_id, user_id, file_name, file_size, mime_type, &bytes).await {
                    room.send_to(user_id, ServerEvent::error(&e));
                }
            }
            Err(e) => {
                room.send_to(user_id, ServerEvent::error(&e));
            }
        },

        ClientMessage::GetHistory { before, limit } => {
            let messages = state.room_hub.get_history(room_id, limit, before.as_deref()).await;
            room.send_to(user_id, ServerEvent::HistoryLoaded { messages });
        }

        ClientMessage::Summarize => {
            let messages = state.room_hub.get_history(room_id, SUMMARY_MAX_COUNT, None).await;
            let ctx = state.agent_ctx.clone();
            let room_id = room_id.clone();
            // Fire-and-forget, same as the automatic threshold-triggered summary.
            tokio::spawn(async move {
                relayhub_agent::pipeline::summary::summarize_room(&room_id, &messages, ctx.llm.as_ref(), &ctx.store, &ctx.blob).await;
            });
        }

        ClientMessage::ClearAiMemory => {
            if let Err(e) = state.agent_ctx.store.delete_summary(room_id.as_str()).await {
                warn!(room = %room_id, error = %e, "failed to clear ai memory");
            }
            room.broadcast(ServerEvent::AiMemoryCleared, None);
        }

        ClientMessage::SetPassword { question, answer } => {
            set_password(&room, user_id, room_id, question, answer, state).await;
        }

        ClientMessage::VoiceJoin => {
            state.voice.asr_start(&room, user_id.clone(), user_name);
        }
        ClientMessage::VoiceLeave => {
            state.voice.asr_stop(room_id, user_id).await;
        }
        ClientMessage::VoiceStartSpeaking | ClientMessage::VoiceStopSpeaking => {
            // Presence-only signals; every `voice_continuous_audio` frame already
            // carries its own `is_speech` flag, so there's nothing to record here.
        }
        ClientMessage::VoiceContinuousAudio { audio_data, is_speech } => {
            if let Ok(bytes) = decode_audio(&audio_data) {
                state.voice.asr_ingest_audio(room_id, user_id, bytes).await;
            }
            state
                .voice
                .broadcast_audio(&room, user_id, &user_name, audio_data, is_speech, chrono::Utc::now().timestamp_millis());
        }
        ClientMessage::VoiceAiAnalyze => {
            // No distinct upstream trigger: the ASR session already emits
            // `voice.ai_analyze` reactively off the upstream chat/tts responses.
        }

        ClientMessage::SharedAiJoin { voice_type, files } => {
            state
                .voice
                .dialog_join(&room, state.room_hub.clone(), user_id.clone(), user_name, voice_type, files.unwrap_or_default());
        }
        ClientMessage::SharedAiLeave => {
            state.voice.dialog_leave(room_id, user_id).await;
        }
        ClientMessage::SharedAiAudio { audio_data, is_speaking } => {
            if let Ok(bytes) = decode_audio(&audio_data) {
                state.voice.dialog_ingest_audio(room_id, user_id.clone(), user_name, bytes, is_speaking).await;
            }
        }
        ClientMessage::SharedAiText { text } => {
            state.voice.dialog_ingest_text(room_id, text).await;
        }
        ClientMessage::SharedAiAddContext { file } => {
            state.voice.dialog_add_context_file(room_id, file);
        }

        ClientMessage::AiButtonAsrStart => {
            state.voice.asr_start(&room, user_id.clone(), user_name);
        }
        ClientMessage::AiButtonAsrAudio { audio_data } => {
            if let Ok(bytes) = decode_audio(&audio_data) {
                state.voice.asr_ingest_audio(room_id, user_id, bytes).await;
            }
        }
        ClientMessage::AiButtonAsrStop => {
            state.voice.asr_stop(room_id, user_id).await;
        }

        ClientMessage::ChatVoiceAiJoin { voice_type } => {
            state
                .voice
                .dialog_join(&room, state.room_hub.clone(), user_id.clone(), user_name, voice_type, Vec::new());
        }
        ClientMessage::ChatVoiceAiAudio { audio_data, is_speaking } => {
            if let Ok(bytes) = decode_audio(&audio_data) {
                state.voice.dialog_ingest_audio(room_id, user_id.clone(), user_name, bytes, is_speaking).await;
            }
        }
        ClientMessage::ChatVoiceAiLeave => {
            state.voice.dialog_leave(room_id, user_id).await;
        }
        ClientMessage::ChatVoiceAiSetMode { wake_word_mode } => {
            state.voice.dialog_set_wake_word_mode(room_id, wake_word_mode);
        }
        ClientMessage::ChatVoiceAiSetWakewords { wake_words } => {
            state.voice.dialog_set_wake_words(room_id, wake_words);
        }

        ClientMessage::RefreshDownloadUrl { oss_key, request_id } => {
            match state.agent_ctx.blob.get_signed_download_url(&oss_key, DOWNLOAD_URL_TTL_SECS).await {
                Ok(url) => room.send_to(user_id, ServerEvent::DownloadUrlRefreshed { request_id, url }),
                Err(e) => room.send_to(user_id, ServerEvent::error(&HubError::from(e))),
            };
        }

        ClientMessage::TranslateMessage { message_id, text, target_language } => {
            translate_message(&room, user_id, message_id, text, target_language, state).await;
        }

        ClientMessage::DeleteFile { file_id } => {
            delete_file(&room, user_id, file_id, state).await;
        }
        ClientMessage::RenameFile { file_id, new_file_name } => {
            rename_file(&room, user_id, file_id, new_file_name, state).await;
        }
        ClientMessage::ListSessionFiles => {
            list_session_files(&room, user_id, room_id, state).await;
        }
    }
}

fn message_payload(
    file_data: Option<relayhub_protocol::message::FileData>,
    voice_data: Option<relayhub_protocol::message::VoiceData>,
    code_data: Option<relayhub_protocol::message::CodeData>,
    image_data: Option<relayhub_protocol::message::ImageData>,
) -> Option<relayhub_protocol::message::MessagePayload> {
    use relayhub_protocol::message::MessagePayload;
    file_data
        .map(MessagePayload::File)
        .or_else(|| voice_data.map(MessagePayload::Voice))
        .or_else(|| code_data.map(MessagePayload::Code))
        .or_else(|| image_data.map(MessagePayload::Image))
}

fn decode_audio(base64_data: &str) -> Result<Vec<u8>, HubError> {
    base64::engine::general_purpose::STANDARD
        .decode(base64_data.as_bytes())
        .map_err(|e| HubError::ProtocolDecode(format!("invalid base64 payload: {e}")))
}

fn has_room_management_rank(room: &Room, user_id: &UserId) -> Result<(), HubError> {
    let role = room.role_of(user_id).ok_or_else(|| HubError::Unauthorized("not a member of this room".into()))?;
    if role.rank() < Role::Admin.rank() {
        return Err(HubError::PermissionDenied {
            reason: "requires admin or owner".to_string(),
        });
    }
    Ok(())
}

async fn set_password(room: &Room, user_id: &UserId, room_id: &RoomId, question: String, answer: String, state: &Arc<AppState>) {
    if let Err(e) = has_room_management_rank(room, user_id) {
        room.send_to(user_id, ServerEvent::error(&e));
        return;
    }
    if let Err(e) = state.agent_ctx.store.set_room_password(room_id.as_str(), &question, &answer).await {
        warn!(room = %room_id, error = %e, "failed to persist room password");
    }
    room.set_password(question, answer);
    room.send_to(user_id, ServerEvent::PasswordSet);
}

async fn translate_message(room: &Room, user_id: &UserId, message_id: String, text: String, target_language: String, state: &Arc<AppState>) {
    use relayhub_agent::provider::{ChatRequest, Message as LlmMessage, Role as LlmRole};

    let req = ChatRequest {
        model: state.agent_ctx.model.clone(),
        system: format!("Translate the user's message into {target_language}. Reply with only the translation, no preamble."),
        system_prompt: None,
        messages: vec![LlmMessage { role: LlmRole::User, content: text }],
        max_tokens: 1024,
        thinking: None,
        tools: Vec::new(),
        raw_messages: None,
    };
    match state.agent_ctx.llm.send(&req).await {
        Ok(resp) => room.send_to(user_id, ServerEvent::TranslationResult { message_id, translated: resp.content }),
        Err(e) => room.send_to(user_id, ServerEvent::TranslationError { message_id, error: e.to_string() }),
    };
}

async fn delete_file(room: &Room, user_id: &UserId, file_id: String, state: &Arc<AppState>) {
    let Some(role) = room.role_of(user_id) else { return };
    if !PermissionChecker::check(role, Permission::FileAny).is_allowed() {
        room.send_to(user_id, ServerEvent::error(&HubError::PermissionDenied { reason: "role lacks file:*".into() }));
        return;
    }
    let file = match state.agent_ctx.store.get_file_by_id(&file_id).await {
        Ok(Some(f)) => f,
        Ok(None) => {
            room.send_to(user_id, ServerEvent::error(&HubError::Internal("file not found".into())));
            return;
        }
        Err(e) => {
            room.send_to(user_id, ServerEvent::error(&HubError::from(e)));
            return;
        }
    };
    if let Err(e) = state.agent_ctx.blob.delete(&file.blob_key).await {
        warn!(file_id, error = %e, "blob delete failed, proceeding to drop store record anyway");
    }
    if let Err(e) = state.agent_ctx.store.delete_file(&file_id).await {
        room.send_to(user_id, ServerEvent::error(&HubError::from(e)));
        return;
    }
    room.broadcast(ServerEvent::FileDeleted { file_id }, None);
}

async fn rename_file(room: &Room, user_id: &UserId, file_id: String, new_file_name: String, state: &Arc<AppState>) {
    let Some(role) = room.role_of(user_id) else { return };
    if !PermissionChecker::check(role, Permission::FileAny).is_allowed() {
        room.send_to(user_id, ServerEvent::error(&HubError::PermissionDenied { reason: "role lacks file:*".into() }));
        return;
    }
    let file = match state.agent_ctx.store.get_file_by_id(&file_id).await {
        Ok(Some(f)) => f,
        Ok(None) => {
            room.send_to(user_id, ServerEvent::error(&HubError::Internal("file not found".into())));
            return;
        }
        Err(e) => {
            room.send_to(user_id, ServerEvent::error(&HubError::from(e)));
            return;
        }
    };
    let new_key = relayhub_blob::object_key(room.id().as_str(), "chat", &relayhub_blob::safe_name(&new_file_name));
    if let Err(e) = state.agent_ctx.blob.rename(&file.blob_key, &new_key).await {
        room.send_to(user_id, ServerEvent::error(&HubError::from(e)));
        return;
    }
    if let Err(e) = state.agent_ctx.store.rename_file(&file_id, &new_file_name).await {
        room.send_to(user_id, ServerEvent::error(&HubError::from(e)));
        return;
    }
    room.broadcast(ServerEvent::FileRenamed { file_id, new_file_name }, None);
}

async fn list_session_files(room: &Room, user_id: &UserId, room_id: &RoomId, state: &Arc<AppState>) {
    match state.agent_ctx.store.get_room_files(room_id.as_str()).await {
        Ok(files) => {
            let files = files
                .into_iter()
                .map(|f| FileInfo {
                    file_id: f.id,
                    file_name: f.file_name,
                    file_size: f.file_size,
                    mime_type: f.mime_type,
                    url: f.blob_url,
                })
                .collect();
            room.send_to(user_id, ServerEvent::SessionFiles { files });
        }
        Err(e) => room.send_to(user_id, ServerEvent::error(&HubError::from(e))),
    }
}
