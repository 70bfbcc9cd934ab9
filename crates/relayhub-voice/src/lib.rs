//! Upstream ASR/dialog session management (§4.8-§4.10, C8-C10).
//!
//! Owns the per-user ASR sessions and per-room shared dialog sessions, each
//! driven by its own background task. The gateway calls into a single
//! [`VoiceManager`] per incoming client message; nothing here reaches back
//! into the wire layer directly — everything is delivered to clients via
//! `Room::broadcast`/`Room::send_to`.

pub mod asr_session;
pub mod backoff;
pub mod broadcast;
pub mod dialog_session;
pub mod error;
pub mod upstream;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relayhub_core::{RoomId, UserId};
use relayhub_room::hub::RoomHub;
use relayhub_room::Room;

pub use asr_session::{AsrSession, AsrState};
pub use broadcast::broadcast_voice_audio;
pub use dialog_session::{DialogSession, DialogState};
pub use error::VoiceError;

/// Registry of live ASR and dialog sessions, keyed the way the reaper and
/// the gateway need to look them up.
pub struct VoiceManager {
    upstream_url: String,
    auth_token: Option<String>,
    default_wake_words: Vec<String>,
    asr_sessions: DashMap<(RoomId, UserId), Arc<AsrSession>>,
    dialog_sessions: DashMap<RoomId, Arc<DialogSession>>,
}

impl VoiceManager {
    pub fn new(config: &relayhub_core::config::VoiceConfig) -> Self {
        Self {
            upstream_url: config.upstream_ws_url.clone(),
            auth_token: config.upstream_auth_token.clone(),
            default_wake_words: config.default_wake_words.clone(),
            asr_sessions: DashMap::new(),
            dialog_sessions: DashMap::new(),
        }
    }

    // ---- C8: per-user ASR session ----------------------------------------

    pub fn asr_start(&self, room: &Room, user_id: UserId, user_name: String) -> Arc<AsrSession> {
        let key = (room.id().clone(), user_id.clone());
        let session = self
            .asr_sessions
            .entry(key)
            .or_insert_with(|| {
                AsrSession::new(room.clone(), user_id, user_name, self.upstream_url.clone(), self.auth_token.clone())
            })
            .clone();
        session.start();
        session
    }

    pub async fn asr_ingest_audio(&self, room_id: &RoomId, user_id: &UserId, bytes: Vec<u8>) {
        if let Some(session) = self.asr_sessions.get(&(room_id.clone(), user_id.clone())) {
            session.ingest_audio(bytes).await;
        }
    }

    pub async fn asr_stop(&self, room_id: &RoomId, user_id: &UserId) {
        if let Some((_, session)) = self.asr_sessions.remove(&(room_id.clone(), user_id.clone())) {
            session.close().await;
        }
    }

    /// Delete agent-ASR side sessions idle longer than `max_age` (§4.11 step 5).
    pub async fn reap_stale_asr_sessions(&self, max_age: Duration) -> usize {
        let stale: Vec<_> = self
            .asr_sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > max_age)
            .map(|entry| entry.key().clone())
            .collect();
        for key in &stale {
            if let Some((_, session)) = self.asr_sessions.remove(key) {
                session.close().await;
            }
        }
        stale.len()
    }

    /// Clears every agent-ASR session outright (§4.11 step 6, heap-critical tier).
    pub async fn clear_all_asr_sessions(&self) -> usize {
        let keys: Vec<_> = self.asr_sessions.iter().map(|e| e.key().clone()).collect();
        for key in &keys {
            if let Some((_, session)) = self.asr_sessions.remove(key) {
                session.close().await;
            }
        }
        keys.len()
    }

    // ---- C9: shared dialog session ----------------------------------------

    pub fn dialog_join(
        &self,
        room: &Room,
        room_hub: Arc<RoomHub>,
        user_id: UserId,
        user_name: String,
        voice_type: Option<String>,
        files: Vec<String>,
    ) -> Arc<DialogSession> {
        let session = self
            .dialog_sessions
            .entry(room.id().clone())
            .or_insert_with(|| {
                DialogSession::new(
                    room.clone(),
                    room_hub,
                    self.upstream_url.clone(),
                    self.auth_token.clone(),
                    self.default_wake_words.clone(),
                )
            })
            .clone();
        session.join(user_id, user_name, voice_type, files);
        session
    }

    pub async fn dialog_leave(&self, room_id: &RoomId, user_id: &UserId) {
        let session = self.dialog_sessions.get(room_id).map(|e| e.value().clone());
        if let Some(session) = session {
            session.leave(user_id).await;
            if session.participant_count() == 0 {
                self.dialog_sessions.remove(room_id);
            }
        }
    }

    pub async fn dialog_ingest_audio(&self, room_id: &RoomId, user_id: UserId, user_name: String, bytes: Vec<u8>, is_speaking: bool) {
        if let Some(session) = self.dialog_sessions.get(room_id).map(|e| e.value().clone()) {
            session.ingest_audio(user_id, user_name, bytes, is_speaking).await;
        }
    }

    pub async fn dialog_ingest_text(&self, room_id: &RoomId, text: String) {
        if let Some(session) = self.dialog_sessions.get(room_id).map(|e| e.value().clone()) {
            session.ingest_text(text).await;
        }
    }

    pub fn dialog_add_context_file(&self, room_id: &RoomId, file: String) {
        if let Some(session) = self.dialog_sessions.get(room_id) {
            session.add_context_file(file);
        }
    }

    pub fn dialog_set_wake_word_mode(&self, room_id: &RoomId, enabled: bool) {
        if let Some(session) = self.dialog_sessions.get(room_id) {
            session.set_wake_word_mode(enabled);
        }
    }

    pub fn dialog_set_wake_words(&self, room_id: &RoomId, words: Vec<String>) {
        if let Some(session) = self.dialog_sessions.get(room_id) {
            session.set_wake_words(words);
        }
    }

    // ---- C10: voice broadcast ----------------------------------------------

    pub fn broadcast_audio(&self, room: &Room, user_id: &UserId, user_name: &str, audio_base64: String, is_speech: bool, timestamp: i64) {
        broadcast_voice_audio(room, user_id, user_name, audio_base64, is_speech, timestamp);
    }
}
