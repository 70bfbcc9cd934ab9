//! Shared, room-scoped dialog session (§4.9, C9): one upstream connection
//! per room, joinable by any member, gated by an optional wake-word.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relayhub_core::config::{DIALOG_MAX_CONTEXT_FILES, DIALOG_TRANSCRIPT_RING_CAP};
use relayhub_core::{RoomId, UserId};
use relayhub_protocol::codec::{event_id, DecodedFrame, Payload};
use relayhub_protocol::ServerEvent;
use relayhub_room::hub::RoomHub;
use relayhub_room::Room;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::backoff::Backoff;
use crate::upstream::UpstreamConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DialogState {
    Idle = 0,
    Connecting = 1,
    Handshaking = 2,
    Ready = 3,
    Reconnecting = 4,
    Closing = 5,
    Closed = 6,
}

impl DialogState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DialogState::Idle,
            1 => DialogState::Connecting,
            2 => DialogState::Handshaking,
            3 => DialogState::Ready,
            4 => DialogState::Reconnecting,
            5 => DialogState::Closing,
            _ => DialogState::Closed,
        }
    }
}

#[derive(Clone)]
struct TranscriptLine {
    user_id: String,
    user_name: String,
    text: String,
}

struct SpeakerState {
    current_speaker: Option<(UserId, String)>,
    speaking: HashSet<UserId>,
}

struct DialogInner {
    participants: HashSet<UserId>,
    speaker: SpeakerState,
    wake_word_mode: bool,
    wake_words: Vec<String>,
    wake_word_detected: bool,
    recent_transcripts: VecDeque<TranscriptLine>,
    session_id: Option<String>,
    backoff: Backoff,
}

impl DialogInner {
    fn new(wake_word_mode: bool, wake_words: Vec<String>) -> Self {
        Self {
            participants: HashSet::new(),
            speaker: SpeakerState {
                current_speaker: None,
                speaking: HashSet::new(),
            },
            wake_word_mode,
            wake_words,
            wake_word_detected: false,
            recent_transcripts: VecDeque::new(),
            session_id: None,
            backoff: Backoff::new(),
        }
    }
}

/// A room's single shared dialog session. Owns the upstream connection and
/// the wake-word/speaker-attribution bookkeeping around it.
pub struct DialogSession {
    room: Room,
    room_hub: Arc<RoomHub>,
    upstream_url: String,
    auth_token: Option<String>,
    voice_type: Mutex<Option<String>>,
    context_files: Mutex<Vec<String>>,
    state_tag: AtomicU8,
    inner: Mutex<DialogInner>,
    upstream: tokio::sync::Mutex<Option<UpstreamConnection>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl DialogSession {
    pub fn new(
        room: Room,
        room_hub: Arc<RoomHub>,
        upstream_url: String,
        auth_token: Option<String>,
        default_wake_words: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            room,
            room_hub,
            upstream_url,
            auth_token,
            voice_type: Mutex::new(None),
            context_files: Mutex::new(Vec::new()),
            state_tag: AtomicU8::new(DialogState::Idle as u8),
            inner: Mutex::new(DialogInner::new(true, default_wake_words)),
            upstream: tokio::sync::Mutex::new(None),
            driver: Mutex::new(None),
        })
    }

    pub fn state(&self) -> DialogState {
        DialogState::from_u8(self.state_tag.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: DialogState) {
        self.state_tag.store(state as u8, Ordering::SeqCst);
    }

    pub fn room_id(&self) -> &RoomId {
        self.room.id()
    }

    pub fn participant_count(&self) -> usize {
        self.inner.lock().unwrap().participants.len()
    }

    /// Join the session. The first joiner supplies `voice_type` and context
    /// files (capped at [`DIALOG_MAX_CONTEXT_FILES`]); later joiners are
    /// just added to the participant set.
    pub fn join(self: &Arc<Self>, user_id: UserId, user_name: String, voice_type: Option<String>, files: Vec<String>) {
        let first_joiner = {
            let mut inner = self.inner.lock().unwrap();
            let was_empty = inner.participants.is_empty();
            inner.participants.insert(user_id.clone());
            was_empty
        };

        if first_joiner {
            *self.voice_type.lock().unwrap() = voice_type;
            let mut ctx = self.context_files.lock().unwrap();
            ctx.clear();
            ctx.extend(files.into_iter().take(DIALOG_MAX_CONTEXT_FILES));
        }

        self.room.broadcast(
            ServerEvent::SharedAiJoined {
                user_id: user_id.to_string(),
                user_name,
            },
            None,
        );

        if first_joiner {
            let voice_type = self.voice_type.lock().unwrap().clone();
            self.room.broadcast(ServerEvent::SharedAiStarted { voice_type }, None);
            self.start();
        }
    }

    /// Leave the session. If the participant set empties, the upstream is
    /// torn down.
    pub async fn leave(self: &Arc<Self>, user_id: &UserId) {
        let now_empty = {
            let mut inner = self.inner.lock().unwrap();
            inner.participants.remove(user_id);
            inner.speaker.speaking.remove(user_id);
            if matches!(&inner.speaker.current_speaker, Some((uid, _)) if uid == user_id) {
                inner.speaker.current_speaker = None;
            }
            inner.participants.is_empty()
        };

        self.room.broadcast(ServerEvent::SharedAiLeft { user_id: user_id.to_string() }, None);

        if now_empty {
            self.close().await;
        }
    }

    pub fn set_wake_word_mode(&self, enabled: bool) {
        self.inner.lock().unwrap().wake_word_mode = enabled;
    }

    pub fn set_wake_words(&self, words: Vec<String>) {
        self.inner.lock().unwrap().wake_words = words;
    }

    /// Ingest an audio burst from a participant (§4.9 speaker attribution).
    pub async fn ingest_audio(self: &Arc<Self>, user_id: UserId, user_name: String, bytes: Vec<u8>, is_speaking: bool) {
        if is_speaking {
            let mut inner = self.inner.lock().unwrap();
            inner.speaker.current_speaker = Some((user_id.clone(), user_name));
            inner.speaker.speaking.insert(user_id);
        }

        if self.state() != DialogState::Ready {
            return;
        }
        let sid = self.inner.lock().unwrap().session_id.clone();
        let Some(sid) = sid else { return };
        let mut guard = self.upstream.lock().await;
        if let Some(conn) = guard.as_mut() {
            if let Err(e) = conn.send_audio(&sid, &bytes).await {
                warn!(error = %e, room_id = %self.room.id(), "dialog audio forward failed");
            }
        }
    }

    /// Ingest a plain text turn (non-audio path, e.g. `shared_ai.text`).
    pub async fn ingest_text(self: &Arc<Self>, text: String) {
        if self.state() != DialogState::Ready {
            return;
        }
        let sid = self.inner.lock().unwrap().session_id.clone();
        let mut guard = self.upstream.lock().await;
        if let Some(conn) = guard.as_mut() {
            let _ = conn
                .send_event(event_id::CLIENT_TEXT_QUERY, sid.as_deref(), &json!({ "text": text }))
                .await;
        }
    }

    pub fn add_context_file(&self, file: String) {
        let mut ctx = self.context_files.lock().unwrap();
        if ctx.len() < DIALOG_MAX_CONTEXT_FILES {
            ctx.push(file);
        }
    }

    fn start(self: &Arc<Self>) {
        let mut driver = self.driver.lock().unwrap();
        if driver.is_some() {
            return;
        }
        let me = Arc::clone(self);
        *driver = Some(tokio::spawn(async move { me.run().await }));
    }

    pub async fn close(self: &Arc<Self>) {
        self.set_state(DialogState::Closing);
        {
            let sid = self.inner.lock().unwrap().session_id.clone();
            let mut guard = self.upstream.lock().await;
            if let Some(conn) = guard.as_mut() {
                let _ = conn.send_event(event_id::CLIENT_FINISH_SESSION, sid.as_deref(), &json!({})).await;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        {
            let mut guard = self.upstream.lock().await;
            if let Some(conn) = guard.as_mut() {
                conn.close().await;
            }
            *guard = None;
        }
        self.set_state(DialogState::Closed);
        if let Some(handle) = self.driver.lock().unwrap().take() {
            handle.abort();
        }
    }

    #[instrument(skip(self), fields(room_id = %self.room.id()))]
    async fn run(self: Arc<Self>) {
        loop {
            if matches!(self.state(), DialogState::Closing | DialogState::Closed) {
                return;
            }
            if self.participant_count() == 0 {
                self.set_state(DialogState::Closed);
                return;
            }

            self.set_state(DialogState::Connecting);
            match UpstreamConnection::connect(&self.upstream_url, self.auth_token.as_deref()).await {
                Ok(mut conn) => match self.handshake(&mut conn).await {
                    Ok(()) => {
                        self.inner.lock().unwrap().backoff.reset();
                        self.set_state(DialogState::Ready);
                        *self.upstream.lock().await = Some(conn);
                        self.recv_loop().await;
                    }
                    Err(e) => warn!(error = %e, "dialog handshake failed"),
                },
                Err(e) => warn!(error = %e, "dialog upstream connect failed"),
            }

            *self.upstream.lock().await = None;
            if matches!(self.state(), DialogState::Closing | DialogState::Closed) {
                return;
            }
            if self.participant_count() == 0 {
                // Participants left during the outage; abandon the reconnect.
                self.set_state(DialogState::Closed);
                return;
            }

            self.set_state(DialogState::Reconnecting);
            let delay = self.inner.lock().unwrap().backoff.next_delay();
            match delay {
                Some(d) => tokio::time::sleep(d).await,
                None => {
                    self.set_state(DialogState::Closed);
                    self.room.broadcast(
                        ServerEvent::SharedAiError {
                            message: "dialog reconnect attempts exhausted".into(),
                        },
                        None,
                    );
                    return;
                }
            }
        }
    }

    async fn handshake(self: &Arc<Self>, conn: &mut UpstreamConnection) -> crate::error::Result<()> {
        self.set_state(DialogState::Connecting);
        conn.send_event(event_id::CLIENT_START_CONNECTION, None, &json!({})).await?;
        loop {
            match conn.recv().await? {
                Some(frame) if frame.event_id == Some(event_id::CONNECTION_STARTED) => break,
                Some(frame) if frame.event_id == Some(event_id::CONNECTION_FAILED) => {
                    return Err(crate::error::VoiceError::Closed("connection_failed".into()));
                }
                Some(_) => continue,
                None => return Err(crate::error::VoiceError::Closed("stream ended during handshake".into())),
            }
        }

        self.set_state(DialogState::Handshaking);
        let voice_type = self.voice_type.lock().unwrap().clone();
        let files = self.context_files.lock().unwrap().clone();
        conn.send_event(
            event_id::CLIENT_START_SESSION,
            None,
            &json!({ "dialog": { "voiceType": voice_type, "contextFiles": files }, "end_smooth_window_ms": 800 }),
        )
        .await?;

        loop {
            match conn.recv().await? {
                Some(frame) if frame.event_id == Some(event_id::SESSION_STARTED) => {
                    self.inner.lock().unwrap().session_id = session_id_of(&frame);
                    return Ok(());
                }
                Some(frame) if frame.event_id == Some(event_id::SESSION_FAILED) => {
                    return Err(crate::error::VoiceError::Closed("session_failed".into()));
                }
                Some(_) => continue,
                None => return Err(crate::error::VoiceError::Closed("stream ended during handshake".into())),
            }
        }
    }

    async fn recv_loop(self: &Arc<Self>) {
        loop {
            let frame = {
                let mut guard = self.upstream.lock().await;
                let Some(conn) = guard.as_mut() else { return };
                conn.recv().await
            };
            match frame {
                Ok(Some(frame)) => self.handle_frame(frame).await,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "dialog upstream recv failed");
                    return;
                }
            }
        }
    }

    fn current_speaker(&self) -> (String, String) {
        match &self.inner.lock().unwrap().speaker.current_speaker {
            Some((uid, name)) => (uid.to_string(), name.clone()),
            None => (String::new(), String::new()),
        }
    }

    async fn handle_frame(self: &Arc<Self>, frame: DecodedFrame) {
        match frame.event_id {
            Some(id) if id == event_id::ASR_RESPONSE => self.handle_asr_response(&frame.payload).await,
            Some(id) if id == event_id::CHAT_RESPONSE => {
                if !self.inner.lock().unwrap().wake_word_detected {
                    return;
                }
                let text = parse_text_field(&frame.payload).unwrap_or_default();
                let (speaker_id, _) = self.current_speaker();
                self.room.broadcast(ServerEvent::SharedAiResponse { text, speaker_id }, None);
            }
            Some(id) if id == event_id::TTS_SENTENCE_START || id == event_id::TTS_RESPONSE => {
                if !self.inner.lock().unwrap().wake_word_detected {
                    return;
                }
                if id == event_id::TTS_RESPONSE {
                    if let Payload::Binary(bytes) = &frame.payload {
                        use base64::Engine;
                        let audio_base64 = base64::engine::general_purpose::STANDARD.encode(bytes);
                        self.room.broadcast(ServerEvent::SharedAiAudio { audio_base64 }, None);
                    }
                }
            }
            Some(id) if id == event_id::CHAT_ENDED || id == event_id::TTS_ENDED => {
                self.inner.lock().unwrap().wake_word_detected = false;
                self.room.broadcast(
                    ServerEvent::SharedAiState { wake_word_detected: false },
                    None,
                );
            }
            Some(id) if id == event_id::DIALOG_ERROR => {
                self.room.broadcast(
                    ServerEvent::SharedAiError {
                        message: "upstream dialog error".into(),
                    },
                    None,
                );
            }
            _ => {}
        }
    }

    async fn handle_asr_response(self: &Arc<Self>, payload: &Payload) {
        let (text, interim) = parse_asr_response(payload);
        let (user_id, user_name) = self.current_speaker();

        self.room.broadcast(
            ServerEvent::SharedAiAsr {
                user_id: user_id.clone(),
                user_name: user_name.clone(),
                text: text.clone(),
                interim,
            },
            None,
        );

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.recent_transcripts.len() >= DIALOG_TRANSCRIPT_RING_CAP {
                inner.recent_transcripts.pop_front();
            }
            inner.recent_transcripts.push_back(TranscriptLine {
                user_id: user_id.clone(),
                user_name: user_name.clone(),
                text: text.clone(),
            });
        }

        if interim {
            return;
        }

        let already_detected = self.inner.lock().unwrap().wake_word_detected;
        let wake_word_mode = self.inner.lock().unwrap().wake_word_mode;
        if already_detected || !wake_word_mode {
            return;
        }

        let matched = {
            let inner = self.inner.lock().unwrap();
            inner.wake_words.iter().any(|w| text.contains(w.as_str()))
        };
        if !matched {
            return;
        }

        self.inner.lock().unwrap().wake_word_detected = true;
        self.room.broadcast(ServerEvent::SharedAiState { wake_word_detected: true }, None);

        let history = self.room_hub.get_history(self.room.id(), 50, None).await;
        let recent_transcripts: Vec<_> = {
            let inner = self.inner.lock().unwrap();
            inner
                .recent_transcripts
                .iter()
                .map(|l| json!({ "userId": l.user_id, "userName": l.user_name, "text": l.text }))
                .collect()
        };
        let prior_chat_history: Vec<_> = history
            .iter()
            .map(|m| json!({ "senderName": m.sender_name, "content": m.content }))
            .collect();

        let sid = self.inner.lock().unwrap().session_id.clone();
        let mut guard = self.upstream.lock().await;
        if let Some(conn) = guard.as_mut() {
            let _ = conn
                .send_event(
                    event_id::CLIENT_TEXT_QUERY,
                    sid.as_deref(),
                    &json!({
                        "priorChatHistory": prior_chat_history,
                        "recentTranscripts": recent_transcripts,
                        "triggerText": text,
                    }),
                )
                .await;
        }
    }
}

fn session_id_of(frame: &DecodedFrame) -> Option<String> {
    if let Some(sid) = &frame.session_id {
        return Some(sid.clone());
    }
    match &frame.payload {
        Payload::Raw(s) => Some(s.clone()),
        Payload::Json(v) => v
            .get("dialogId")
            .or_else(|| v.get("sessionId"))
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        Payload::Binary(_) => None,
    }
}

fn parse_asr_response(payload: &Payload) -> (String, bool) {
    match payload {
        Payload::Json(v) => {
            let text = v.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let interim = v
                .get("isFinal")
                .and_then(|v| v.as_bool())
                .map(|is_final| !is_final)
                .unwrap_or(true);
            (text, interim)
        }
        Payload::Raw(s) => (s.clone(), true),
        Payload::Binary(_) => (String::new(), true),
    }
}

fn parse_text_field(payload: &Payload) -> Option<String> {
    match payload {
        Payload::Json(v) => v.get("text").and_then(|v| v.as_str()).map(str::to_owned),
        Payload::Raw(s) => Some(s.clone()),
        Payload::Binary(_) => None,
    }
}
