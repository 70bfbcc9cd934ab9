//! WebSocket connection to the external ASR/dialog provider, carrying the
//! C1 binary frame codec (§4.1). Distinct from the hub's own client-facing
//! JSON envelope — this is the one socket the hub dials *out* on.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use relayhub_protocol::codec::{self, DecodedFrame};

use crate::error::{Result, VoiceError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live connection to the upstream dialog provider.
pub struct UpstreamConnection {
    stream: WsStream,
}

impl UpstreamConnection {
    /// Dial the provider. `auth_token`, when set, is sent as a bearer token
    /// on the upgrade request.
    pub async fn connect(url: &str, auth_token: Option<&str>) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|e| VoiceError::ConnectFailed(e.to_string()))?;

        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| VoiceError::ConnectFailed(e.to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| VoiceError::ConnectFailed(e.to_string()))?;

        Ok(Self { stream })
    }

    /// Send a connect-/session-class event frame.
    pub async fn send_event(&mut self, event_id: u32, session_id: Option<&str>, payload: &serde_json::Value) -> Result<()> {
        let bytes = codec::encode_client_event(event_id, session_id, payload);
        self.stream
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| VoiceError::SendFailed(e.to_string()))
    }

    /// Send an audio frame for an established session.
    pub async fn send_audio(&mut self, session_id: &str, bytes: &[u8]) -> Result<()> {
        let frame = codec::encode_client_audio(session_id, bytes);
        self.stream
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| VoiceError::SendFailed(e.to_string()))
    }

    /// Receive and decode the next frame. `Ok(None)` means the stream ended
    /// cleanly.
    pub async fn recv(&mut self) -> Result<Option<DecodedFrame>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Some(codec::decode(&bytes)?));
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Err(VoiceError::Closed(reason));
                }
                Some(Ok(Message::Text(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // Provider speaks binary only; anything else is ignored.
                }
                Some(Err(e)) => return Err(VoiceError::Closed(e.to_string())),
                None => return Ok(None),
            }
        }
    }

    pub async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
