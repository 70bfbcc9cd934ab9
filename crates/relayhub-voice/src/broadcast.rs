//! Voice Broadcast (§4.10, C10): fans out a member's raw audio frame to the
//! rest of the room, independent of any ASR/dialog session state.

use relayhub_core::UserId;
use relayhub_protocol::ServerEvent;
use relayhub_room::Room;

pub fn broadcast_voice_audio(room: &Room, user_id: &UserId, user_name: &str, audio_base64: String, is_speech: bool, timestamp: i64) {
    room.broadcast(
        ServerEvent::VoiceAudio {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            audio_base64,
            is_speech,
            timestamp,
        },
        Some(user_id),
    );
}
