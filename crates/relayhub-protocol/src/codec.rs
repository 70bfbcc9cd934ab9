//! Binary frame codec for the upstream dialog-provider protocol (§4.1, C1).
//!
//! This is a different wire than the hub's own client-facing JSON envelope
//! (`client`/`server` modules) — it only speaks to the external ASR/dialog
//! provider that `relayhub-voice`'s sessions dial out to.

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too short: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown message type {0:#x}")]
    UnknownMessageType(u8),
    #[error("unknown serialization {0:#x}")]
    UnknownSerialization(u8),
    #[error("unknown compression {0:#x}")]
    UnknownCompression(u8),
    #[error("gzip inflate failed: {0}")]
    Gzip(String),
    #[error("session id is not valid UTF-8")]
    InvalidSessionId,
}

pub const PROTOCOL_VERSION: u8 = 1;
const HEADER_SIZE_WORDS: u8 = 1; // one 4-byte word

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    FullClient,
    AudioClient,
    FullServer,
    AudioServer,
    Error,
}

impl MessageType {
    fn to_nibble(self) -> u8 {
        match self {
            MessageType::FullClient => 0x1,
            MessageType::AudioClient => 0x2,
            MessageType::FullServer => 0x9,
            MessageType::AudioServer => 0xB,
            MessageType::Error => 0xF,
        }
    }

    fn from_nibble(n: u8) -> Result<Self, CodecError> {
        match n {
            0x1 => Ok(MessageType::FullClient),
            0x2 => Ok(MessageType::AudioClient),
            0x9 => Ok(MessageType::FullServer),
            0xB => Ok(MessageType::AudioServer),
            0xF => Ok(MessageType::Error),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    Raw,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

/// Flag bits within byte 1's low nibble.
///
/// The spec names only the event-tagged bit explicitly; the remaining bits
/// are this codec's own bookkeeping for which optional fields follow the
/// header, decided consistently for encode and decode.
mod flags {
    pub const HAS_SEQUENCE: u8 = 0b0001;
    pub const HAS_SESSION_ID: u8 = 0b0010;
    pub const EVENT_TAGGED: u8 = 0b0100;
}

/// A decoded frame, independent of its on-wire shape.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub message_type: MessageType,
    pub event_id: Option<u32>,
    pub session_id: Option<String>,
    pub sequence: Option<i32>,
    pub error_code: Option<u32>,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Json(serde_json::Value),
    Raw(String),
    Binary(Vec<u8>),
}

/// Decode one frame from `input`. Audio payloads (`AudioClient`/`AudioServer`)
/// are never parsed — they stay `Payload::Binary`.
pub fn decode(input: &[u8]) -> Result<DecodedFrame, CodecError> {
    if input.len() < 4 {
        return Err(CodecError::Truncated {
            need: 4,
            got: input.len(),
        });
    }

    let b0 = input[0];
    let b1 = input[1];
    let b2 = input[2];

    let version = b0 >> 4;
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let message_type = MessageType::from_nibble(b1 >> 4)?;
    let flag_bits = b1 & 0x0F;

    let serialization = match b2 >> 4 {
        0x0 => Serialization::Raw,
        0x1 => Serialization::Json,
        other => return Err(CodecError::UnknownSerialization(other)),
    };
    let compression = match b2 & 0x0F {
        0x0 => Compression::None,
        0x1 => Compression::Gzip,
        other => return Err(CodecError::UnknownCompression(other)),
    };

    let mut cursor = 4usize;
    let mut error_code = None;
    let mut sequence = None;
    let mut event_id = None;
    let mut session_id = None;

    if message_type == MessageType::Error {
        let (v, next) = read_u32(input, cursor)?;
        error_code = Some(v);
        cursor = next;
    }

    if flag_bits & flags::HAS_SEQUENCE != 0 {
        let (v, next) = read_u32(input, cursor)?;
        sequence = Some(v as i32);
        cursor = next;
    }

    if flag_bits & flags::EVENT_TAGGED != 0 {
        let (v, next) = read_u32(input, cursor)?;
        event_id = Some(v);
        cursor = next;
    }

    if flag_bits & flags::HAS_SESSION_ID != 0 {
        let (size, next) = read_u32(input, cursor)?;
        cursor = next;
        let size = size as usize;
        if input.len() < cursor + size {
            return Err(CodecError::Truncated {
                need: cursor + size,
                got: input.len(),
            });
        }
        let bytes = &input[cursor..cursor + size];
        session_id = Some(String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidSessionId)?);
        cursor += size;
    }

    let (payload_size, next) = read_u32(input, cursor)?;
    cursor = next;
    let payload_size = payload_size as usize;
    if input.len() < cursor + payload_size {
        return Err(CodecError::Truncated {
            need: cursor + payload_size,
            got: input.len(),
        });
    }
    let raw_payload = &input[cursor..cursor + payload_size];

    if matches!(message_type, MessageType::AudioClient | MessageType::AudioServer) {
        return Ok(DecodedFrame {
            message_type,
            event_id,
            session_id,
            sequence,
            error_code,
            payload: Payload::Binary(raw_payload.to_vec()),
        });
    }

    let inflated = match compression {
        Compression::None => raw_payload.to_vec(),
        Compression::Gzip => inflate(raw_payload)?,
    };

    let payload = match serialization {
        Serialization::Raw => Payload::Raw(String::from_utf8_lossy(&inflated).into_owned()),
        Serialization::Json => {
            let starts_json = inflated
                .iter()
                .find(|b| !b.is_ascii_whitespace())
                .is_some_and(|&b| b == b'{' || b == b'[');
            if starts_json {
                let value = serde_json::from_slice(&inflated)
                    .map_err(|e| CodecError::Gzip(format!("invalid json payload: {e}")))?;
                Payload::Json(value)
            } else {
                // Provider emits raw UUIDs under the JSON flag on some events.
                Payload::Raw(String::from_utf8_lossy(&inflated).into_owned())
            }
        }
    };

    Ok(DecodedFrame {
        message_type,
        event_id,
        session_id,
        sequence,
        error_code,
        payload,
    })
}

/// Encode a connect-/session-class client event. `session_id` is omitted for
/// connect-class events and present for session-class events.
pub fn encode_client_event(
    event_id: u32,
    session_id: Option<&str>,
    json_payload: &serde_json::Value,
) -> Vec<u8> {
    let mut flag_bits = flags::EVENT_TAGGED;
    if session_id.is_some() {
        flag_bits |= flags::HAS_SESSION_ID;
    }

    let payload_bytes = serde_json::to_vec(json_payload).unwrap_or_default();

    let mut out = Vec::with_capacity(16 + payload_bytes.len());
    out.push((PROTOCOL_VERSION << 4) | HEADER_SIZE_WORDS);
    out.push((MessageType::FullClient.to_nibble() << 4) | flag_bits);
    out.push((Serialization::Json as u8) << 4); // compression None
    out.push(0); // reserved

    out.extend_from_slice(&event_id.to_be_bytes());

    if let Some(sid) = session_id {
        out.extend_from_slice(&(sid.len() as u32).to_be_bytes());
        out.extend_from_slice(sid.as_bytes());
    }

    out.extend_from_slice(&(payload_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload_bytes);
    out
}

/// Encode an audio frame for an established session.
pub fn encode_client_audio(session_id: &str, bytes: &[u8]) -> Vec<u8> {
    let flag_bits = flags::HAS_SESSION_ID;

    let mut out = Vec::with_capacity(16 + bytes.len());
    out.push((PROTOCOL_VERSION << 4) | HEADER_SIZE_WORDS);
    out.push((MessageType::AudioClient.to_nibble() << 4) | flag_bits);
    out.push(0); // raw serialization, no compression for audio
    out.push(0);

    out.extend_from_slice(&(session_id.len() as u32).to_be_bytes());
    out.extend_from_slice(session_id.as_bytes());

    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

fn read_u32(input: &[u8], at: usize) -> Result<(u32, usize), CodecError> {
    if input.len() < at + 4 {
        return Err(CodecError::Truncated {
            need: at + 4,
            got: input.len(),
        });
    }
    let v = u32::from_be_bytes([input[at], input[at + 1], input[at + 2], input[at + 3]]);
    Ok((v, at + 4))
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Gzip(e.to_string()))?;
    Ok(out)
}

#[allow(dead_code)]
fn deflate(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(bytes, Compression::default());
    let mut out = Vec::new();
    let _ = encoder.read_to_end(&mut out);
    out
}

// Event ids that drive the state machine (§4.1).
pub mod event_id {
    pub const CLIENT_START_CONNECTION: u32 = 1;
    pub const CLIENT_START_SESSION: u32 = 100;
    pub const CLIENT_FINISH_SESSION: u32 = 102;
    pub const CLIENT_AUDIO_TASK: u32 = 200;
    pub const CLIENT_TEXT_QUERY: u32 = 501;

    pub const CONNECTION_STARTED: u32 = 50;
    pub const CONNECTION_FAILED: u32 = 51;
    pub const SESSION_STARTED: u32 = 150;
    pub const SESSION_FAILED: u32 = 153;
    pub const ASR_INFO: u32 = 450;
    pub const ASR_RESPONSE: u32 = 451;
    pub const ASR_ENDED: u32 = 459;
    pub const CHAT_RESPONSE: u32 = 550;
    pub const CHAT_ENDED: u32 = 559;
    pub const TTS_SENTENCE_START: u32 = 350;
    pub const TTS_RESPONSE: u32 = 352;
    pub const TTS_ENDED: u32 = 359;
    pub const DIALOG_ERROR: u32 = 599;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_connect_event_without_session_id() {
        let payload = json!({"hello": "world"});
        let bytes = encode_client_event(event_id::CLIENT_START_CONNECTION, None, &payload);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.message_type, MessageType::FullClient);
        assert_eq!(decoded.event_id, Some(event_id::CLIENT_START_CONNECTION));
        assert!(decoded.session_id.is_none());
        match decoded.payload {
            Payload::Json(v) => assert_eq!(v, payload),
            other => panic!("expected json payload, got {other:?}"),
        }
    }

    #[test]
    fn round_trips_session_event_with_session_id() {
        let payload = json!({"dialog": {"dialogId": "abc"}});
        let bytes = encode_client_event(event_id::CLIENT_START_SESSION, Some("sess-1"), &payload);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.event_id, Some(event_id::CLIENT_START_SESSION));
        assert_eq!(decoded.session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn round_trips_audio_frame_without_parsing_payload() {
        let bytes = encode_client_audio("sess-1", &[1, 2, 3, 4, 5]);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.message_type, MessageType::AudioClient);
        assert_eq!(decoded.session_id.as_deref(), Some("sess-1"));
        match decoded.payload {
            Payload::Binary(b) => assert_eq!(b, vec![1, 2, 3, 4, 5]),
            other => panic!("expected binary payload, got {other:?}"),
        }
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let err = decode(&[0u8, 1, 2]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn raw_uuid_under_json_flag_is_treated_as_raw_string() {
        // Build a FullServer frame, JSON-flagged, whose payload is a bare
        // UUID string rather than a JSON document — the provider does this
        // for some events.
        let mut out = Vec::new();
        out.push((PROTOCOL_VERSION << 4) | HEADER_SIZE_WORDS);
        out.push((MessageType::FullServer.to_nibble() << 4) | flags::EVENT_TAGGED);
        out.push(0x10); // JSON serialization, no compression
        out.push(0);
        out.extend_from_slice(&event_id::SESSION_STARTED.to_be_bytes());
        let raw = b"3fa85f64-5717-4562-b3fc-2c963f66afa6";
        out.extend_from_slice(&(raw.len() as u32).to_be_bytes());
        out.extend_from_slice(raw);

        let decoded = decode(&out).unwrap();
        match decoded.payload {
            Payload::Raw(s) => assert_eq!(s, String::from_utf8_lossy(raw)),
            other => panic!("expected raw payload, got {other:?}"),
        }
    }
}
