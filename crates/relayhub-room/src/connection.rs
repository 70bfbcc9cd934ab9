//! Per-connection handle the Room Hub holds for fan-out (§4.5, §5).
//!
//! The hub never touches a socket directly: each live connection is
//! represented by an [`EventSink`] that the gateway wires to its own
//! send-queue task, preserving per-socket ordering without the hub blocking
//! on a slow consumer.

use relayhub_core::{Role, UserId};
use relayhub_protocol::ServerEvent;

/// Delivers one event to a single connection's send-queue. Implementations
/// must not block; a full or closed queue is reported via the `bool` return
/// so the hub can schedule the connection for close rather than stall
/// fan-out to everyone else.
pub trait EventSink: Send + Sync {
    fn send(&self, event: ServerEvent) -> bool;
}

pub struct Connection {
    pub user_id: UserId,
    pub user_name: String,
    pub role: Role,
    pub device_id: Option<String>,
    pub status: String,
    pub joined_at: String,
    sink: Box<dyn EventSink>,
}

impl Connection {
    pub fn new(
        user_id: UserId,
        user_name: String,
        role: Role,
        device_id: Option<String>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        Self {
            user_id,
            user_name,
            role,
            device_id,
            status: "online".to_string(),
            joined_at: chrono::Utc::now().to_rfc3339(),
            sink,
        }
    }

    /// Best-effort send; `false` means the connection should be torn down.
    pub fn emit(&self, event: ServerEvent) -> bool {
        self.sink.send(event)
    }

    /// Unwraps the underlying sink, e.g. to hand a parked pending admission's
    /// connection back into `Connection::new` once it clears the password gate.
    pub fn into_sink(self) -> Box<dyn EventSink> {
        self.sink
    }
}

/// `tokio::sync::mpsc` backed sink — the gateway's usual wiring: the
/// receiving half is drained by a dedicated send-queue task per connection.
pub struct MpscEventSink(pub tokio::sync::mpsc::UnboundedSender<ServerEvent>);

impl EventSink for MpscEventSink {
    fn send(&self, event: ServerEvent) -> bool {
        self.0.send(event).is_ok()
    }
}
