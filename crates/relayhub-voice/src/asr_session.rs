//! Per-user ASR session (§4.8, C8): one upstream dialog-provider connection
//! per `(roomId, userId)`, driven by a background task owned by the session
//! itself.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use relayhub_core::config::ASR_PENDING_AUDIO_CAP;
use relayhub_core::UserId;
use relayhub_protocol::codec::{event_id, DecodedFrame, Payload};
use relayhub_protocol::ServerEvent;
use relayhub_room::Room;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::backoff::Backoff;
use crate::upstream::UpstreamConnection;

const SINGLE_CHAR_HOLD: Duration = Duration::from_secs(5);
const DUPLICATE_WINDOW: Duration = Duration::from_secs(3);
const DUPLICATE_SIMILARITY: f64 = 0.5;
const COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AsrState {
    Idle = 0,
    Connecting = 1,
    Handshaking = 2,
    Ready = 3,
    Reconnecting = 4,
    Closing = 5,
    Closed = 6,
}

impl AsrState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => AsrState::Idle,
            1 => AsrState::Connecting,
            2 => AsrState::Handshaking,
            3 => AsrState::Ready,
            4 => AsrState::Reconnecting,
            5 => AsrState::Closing,
            _ => AsrState::Closed,
        }
    }
}

struct PendingSingleChar {
    text: String,
    generation: u64,
}

struct SessionState {
    pending_audio: VecDeque<Vec<u8>>,
    session_id: Option<String>,
    last_emitted: Option<(String, Instant)>,
    cooldown_until: Option<Instant>,
    pending_single_char: Option<PendingSingleChar>,
    coalesce_generation: u64,
    backoff: Backoff,
    accumulated: String,
}

impl SessionState {
    fn new() -> Self {
        Self {
            pending_audio: VecDeque::new(),
            session_id: None,
            last_emitted: None,
            cooldown_until: None,
            pending_single_char: None,
            coalesce_generation: 0,
            backoff: Backoff::new(),
            accumulated: String::new(),
        }
    }
}

/// A live per-user ASR session. Cheap to hold behind an `Arc`; the
/// background driver task keeps it alive until [`AsrSession::close`] moves
/// it to `Closed`.
pub struct AsrSession {
    room: Room,
    user_id: UserId,
    user_name: String,
    upstream_url: String,
    auth_token: Option<String>,
    state_tag: AtomicU8,
    state: Mutex<SessionState>,
    upstream: AsyncMutex<Option<UpstreamConnection>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    last_active: Mutex<Instant>,
}

impl AsrSession {
    pub fn new(room: Room, user_id: UserId, user_name: String, upstream_url: String, auth_token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            room,
            user_id,
            user_name,
            upstream_url,
            auth_token,
            state_tag: AtomicU8::new(AsrState::Idle as u8),
            state: Mutex::new(SessionState::new()),
            upstream: AsyncMutex::new(None),
            driver: Mutex::new(None),
            last_active: Mutex::new(Instant::now()),
        })
    }

    /// How long since this session last saw audio or an ASR result, for the
    /// reaper's stale-session sweep (§4.11 step 5).
    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().unwrap().elapsed()
    }

    pub fn state(&self) -> AsrState {
        AsrState::from_u8(self.state_tag.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: AsrState) {
        self.state_tag.store(state as u8, Ordering::SeqCst);
    }

    /// Spawn the connect/handshake/recv driver. Idempotent: calling it twice
    /// leaves the first driver running.
    pub fn start(self: &Arc<Self>) {
        let mut driver = self.driver.lock().unwrap();
        if driver.is_some() {
            return;
        }
        let me = Arc::clone(self);
        *driver = Some(tokio::spawn(async move { me.run().await }));
    }

    /// Queue or forward an audio frame depending on readiness (§4.8 ingest rules).
    pub async fn ingest_audio(&self, bytes: Vec<u8>) {
        *self.last_active.lock().unwrap() = Instant::now();
        if self.state() == AsrState::Ready {
            let sid = { self.state.lock().unwrap().session_id.clone() };
            if let Some(sid) = sid {
                let mut guard = self.upstream.lock().await;
                if let Some(conn) = guard.as_mut() {
                    if let Err(e) = conn.send_audio(&sid, &bytes).await {
                        warn!(error = %e, user_id = %self.user_id, "asr audio forward failed");
                    }
                    return;
                }
            }
        }
        self.buffer_audio(bytes);
    }

    fn buffer_audio(&self, bytes: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        if state.pending_audio.len() >= ASR_PENDING_AUDIO_CAP {
            state.pending_audio.pop_front();
        }
        state.pending_audio.push_back(bytes);
    }

    /// Request a graceful close: send `FinishSession`, wait briefly for
    /// flush, then close the socket.
    pub async fn close(self: &Arc<Self>) {
        self.set_state(AsrState::Closing);
        {
            let mut guard = self.upstream.lock().await;
            if let Some(conn) = guard.as_mut() {
                let sid = self.state.lock().unwrap().session_id.clone();
                let _ = conn
                    .send_event(event_id::CLIENT_FINISH_SESSION, sid.as_deref(), &json!({}))
                    .await;
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
        self.set_state(AsrState::Closed);
        if let Some(handle) = self.driver.lock().unwrap().take() {
            handle.abort();
        }
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn run(self: Arc<Self>) {
        loop {
            if matches!(self.state(), AsrState::Closing | AsrState::Closed) {
                return;
            }
            self.set_state(AsrState::Connecting);
            match UpstreamConnection::connect(&self.upstream_url, self.auth_token.as_deref()).await {
                Ok(mut conn) => match self.handshake(&mut conn).await {
                    Ok(()) => {
                        self.state.lock().unwrap().backoff.reset();
                        self.flush_pending_audio(&mut conn).await;
                        self.emit(ServerEvent::VoiceAsrReady);
                        *self.upstream.lock().await = Some(conn);
                        self.set_state(AsrState::Ready);
                        self.recv_loop().await;
                    }
                    Err(e) => warn!(error = %e, "asr handshake failed"),
                },
                Err(e) => warn!(error = %e, "asr upstream connect failed"),
            }

            *self.upstream.lock().await = None;
            if matches!(self.state(), AsrState::Closing | AsrState::Closed) {
                return;
            }

            self.set_state(AsrState::Reconnecting);
            let delay = self.state.lock().unwrap().backoff.next_delay();
            match delay {
                Some(d) => tokio::time::sleep(d).await,
                None => {
                    self.set_state(AsrState::Closed);
                    self.emit(ServerEvent::Error {
                        message: "asr reconnect attempts exhausted".into(),
                        details: None,
                    });
                    return;
                }
            }
        }
    }

    async fn handshake(self: &Arc<Self>, conn: &mut UpstreamConnection) -> crate::error::Result<()> {
        self.set_state(AsrState::Connecting);
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

        self.set_state(AsrState::Handshaking);
        conn.send_event(
            event_id::CLIENT_START_SESSION,
            None,
            &json!({"dialog": {}, "end_smooth_window_ms": 800}),
        )
        .await?;

        loop {
            match conn.recv().await? {
                Some(frame) if frame.event_id == Some(event_id::SESSION_STARTED) => {
                    let sid = session_id_of(&frame);
                    self.state.lock().unwrap().session_id = sid;
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

    async fn flush_pending_audio(&self, conn: &mut UpstreamConnection) {
        let (sid, frames) = {
            let mut state = self.state.lock().unwrap();
            let frames: Vec<_> = state.pending_audio.drain(..).collect();
            (state.session_id.clone(), frames)
        };
        let Some(sid) = sid else { return };
        for frame in frames {
            if let Err(e) = conn.send_audio(&sid, &frame).await {
                warn!(error = %e, "failed to flush buffered asr audio");
                break;
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
                    warn!(error = %e, "asr upstream recv failed");
                    return;
                }
            }
        }
    }

    async fn handle_frame(self: &Arc<Self>, frame: DecodedFrame) {
        match frame.event_id {
            Some(id) if id == event_id::ASR_RESPONSE => {
                let (text, interim) = parse_asr_response(&frame.payload);
                self.handle_asr_result(text, interim).await;
            }
            Some(id) if id == event_id::CHAT_RESPONSE => {
                let text = parse_text_field(&frame.payload).unwrap_or_default();
                self.emit(ServerEvent::VoiceAiAnalyze {
                    result: json!({ "text": text }),
                });
            }
            Some(id) if id == event_id::TTS_RESPONSE => {
                if let Payload::Binary(bytes) = &frame.payload {
                    use base64::Engine;
                    let audio_base64 = base64::engine::general_purpose::STANDARD.encode(bytes);
                    self.emit(ServerEvent::VoiceAiAnalyze {
                        result: json!({ "audio": audio_base64 }),
                    });
                }
            }
            Some(id) if id == event_id::ASR_ENDED || id == event_id::CHAT_ENDED || id == event_id::TTS_ENDED => {}
            Some(id) if id == event_id::DIALOG_ERROR => {
                self.emit(ServerEvent::Error {
                    message: "upstream dialog error".into(),
                    details: None,
                });
            }
            _ => {}
        }
    }

    async fn handle_asr_result(self: &Arc<Self>, text: String, interim: bool) {
        if self.in_cooldown() {
            return;
        }

        if interim {
            self.emit(ServerEvent::VoiceTranscript {
                user_id: self.user_id.to_string(),
                text,
                interim: true,
            });
            return;
        }

        let held = {
            let mut state = self.state.lock().unwrap();
            state.pending_single_char.take()
        };
        if let Some(held) = held {
            let combined = format!("{}{}", held.text, text);
            self.emit_final(combined).await;
            return;
        }

        if normalize(&text).chars().count() == 1 {
            let generation = {
                let mut state = self.state.lock().unwrap();
                state.coalesce_generation += 1;
                let generation = state.coalesce_generation;
                state.pending_single_char = Some(PendingSingleChar { text, generation });
                generation
            };
            let me = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(SINGLE_CHAR_HOLD).await;
                me.expire_single_char(generation).await;
            });
            return;
        }

        self.emit_final(text).await;
    }

    async fn expire_single_char(self: &Arc<Self>, generation: u64) {
        let held = {
            let mut state = self.state.lock().unwrap();
            match &state.pending_single_char {
                Some(p) if p.generation == generation => state.pending_single_char.take(),
                _ => None,
            }
        };
        if let Some(held) = held {
            self.emit_final(held.text).await;
        }
    }

    async fn emit_final(self: &Arc<Self>, text: String) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some((last, at)) = &state.last_emitted {
                if at.elapsed() < DUPLICATE_WINDOW && similarity(last, &text) > DUPLICATE_SIMILARITY {
                    return;
                }
            }
            state.last_emitted = Some((text.clone(), Instant::now()));
            state.cooldown_until = Some(Instant::now() + COOLDOWN);
            state.accumulated.push_str(&text);
        }

        self.emit(ServerEvent::VoiceTranscript {
            user_id: self.user_id.to_string(),
            text: text.clone(),
            interim: false,
        });
        self.emit(ServerEvent::VoiceTranscriptFinal {
            user_id: self.user_id.to_string(),
            text,
        });
    }

    fn in_cooldown(&self) -> bool {
        matches!(self.state.lock().unwrap().cooldown_until, Some(until) if Instant::now() < until)
    }

    fn emit(&self, event: ServerEvent) {
        self.room.send_to(&self.user_id, event);
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
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

/// Strips whitespace and common ASCII/CJK punctuation before comparing text.
fn normalize(s: &str) -> String {
    const CJK_PUNCT: &[char] = &['。', '，', '、', '！', '？', '“', '”', '…', '·'];
    s.chars()
        .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation() && !CJK_PUNCT.contains(c))
        .collect()
}

/// Positional character match over the longer string's length, after
/// normalizing both sides (§4.8 duplicate suppression).
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize(a).chars().collect();
    let b: Vec<char> = normalize(b).chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    let matches = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matches as f64 / max_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_whitespace() {
        assert_eq!(normalize("hello, world!"), "helloworld");
        assert_eq!(normalize("你好。吗？"), "你好吗");
    }

    #[test]
    fn similarity_detects_near_identical_strings() {
        assert!(similarity("hello there", "hello there.") > 0.99);
        assert!(similarity("hello there", "goodbye now") < 0.3);
    }

    #[test]
    fn similarity_of_empty_strings_is_one() {
        assert_eq!(similarity("", ""), 1.0);
    }
}
