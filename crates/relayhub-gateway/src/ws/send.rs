use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::SinkExt;

pub type WsSink = futures_util::stream::SplitSink<WebSocket, Message>;

/// Serialize any value to JSON and send it over the WS connection.
pub async fn json<T: serde::Serialize>(tx: &mut WsSink, payload: &T) -> Result<(), axum::Error> {
    let json = serde_json::to_string(payload).unwrap_or_default();
    tx.send(Message::Text(json.into())).await.map_err(axum::Error::new)
}

/// A policy-violation close frame carrying a human-readable reason (§7).
pub fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
