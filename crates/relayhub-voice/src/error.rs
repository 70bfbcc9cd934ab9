//! Errors for the upstream ASR/dialog session manager.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("upstream connect failed: {0}")]
    ConnectFailed(String),

    #[error("upstream closed: {0}")]
    Closed(String),

    #[error("upstream send failed: {0}")]
    SendFailed(String),

    #[error("frame decode error: {0}")]
    Codec(#[from] relayhub_protocol::codec::CodecError),

    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error("no such session")]
    SessionNotFound,
}

pub type Result<T> = std::result::Result<T, VoiceError>;

impl From<VoiceError> for relayhub_core::HubError {
    fn from(e: VoiceError) -> Self {
        relayhub_core::HubError::UpstreamFailure(e.to_string())
    }
}
