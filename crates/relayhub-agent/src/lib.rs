//! The AI participant (C6/C7): a Room Hub `AgentDispatcher` implementation
//! that runs the agent loop (§4.6) whenever a message mentions the AI, and
//! posts its reply back into the room as a synthetic participant.
//!
//! There is exactly one channel here — the Room Hub — so unlike a
//! multi-adapter agent this crate owns its dispatch entry point directly
//! rather than exposing a trait for hosts to implement against.

pub mod anthropic;
pub mod fspolicy;
pub mod heuristics;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod thinking;
pub mod tools;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info};

use relayhub_core::{Role, RoomId, UserId};
use relayhub_protocol::message::MessageType;
use relayhub_protocol::{ChatMessage, ServerEvent};
use relayhub_room::connection::{Connection, EventSink};
use relayhub_room::hub::AgentDispatcher;

pub use pipeline::AgentContext;
use pipeline::process::HISTORY_LIMIT;

/// Event sink for the synthetic AI participant — the AI never has a socket
/// to deliver events to, so every send is a no-op success.
struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ServerEvent) -> bool {
        true
    }
}

/// The AI's `AgentDispatcher` implementation. One instance is shared across
/// all rooms; it tracks each room's synthetic AI identity so replies always
/// come from the same participant.
pub struct AgentHandle {
    ctx: Arc<AgentContext>,
    prompt_builder: Arc<prompt::PromptBuilder>,
    ai_identities: DashMap<RoomId, UserId>,
}

impl AgentHandle {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx, prompt_builder: Arc::new(prompt::PromptBuilder::new()), ai_identities: DashMap::new() }
    }

    /// Resolves (creating if absent) the stable `UserId` this room's AI
    /// participant posts as.
    fn ai_identity_for(&self, room_id: &RoomId) -> UserId {
        self.ai_identities.entry(room_id.clone()).or_insert_with(UserId::new).clone()
    }

    /// Ensures the room has a live connection for the AI participant so
    /// `RoomHub::send_message`'s `role_of` lookup resolves (§4.5 "Message
    /// fan-out" requires the sender to already be a room member).
    fn ensure_ai_participant(&self, room_id: &RoomId, ai_user_id: &UserId) {
        let Some(room) = self.ctx.room_hub.room(room_id) else {
            return;
        };
        if room.role_of(ai_user_id).is_some() {
            return;
        }
        let connection = Connection::new(ai_user_id.clone(), "AI".to_string(), Role::Ai, None, Box::new(NullEventSink));
        room.insert_connection(connection);
    }
}

impl AgentDispatcher for AgentHandle {
    fn dispatch(&self, room_id: RoomId, trigger_message: ChatMessage) {
        let ctx = Arc::clone(&self.ctx);
        let prompt_builder = Arc::clone(&self.prompt_builder);
        let ai_user_id = self.ai_identity_for(&room_id);
        self.ensure_ai_participant(&room_id, &ai_user_id);

        tokio::spawn(async move {
            run_dispatch(ctx, prompt_builder, room_id, ai_user_id, trigger_message).await;
        });
    }
}

async fn run_dispatch(
    ctx: Arc<AgentContext>,
    prompt_builder: Arc<prompt::PromptBuilder>,
    room_id: RoomId,
    ai_user_id: UserId,
    trigger: ChatMessage,
) {
    let history = ctx.room_hub.get_history(&room_id, HISTORY_LIMIT, None).await;

    let result = pipeline::process_message(&ctx, &prompt_builder, room_id.clone(), &history, &trigger).await;

    match result {
        Ok(processed) if !processed.content.trim().is_empty() => {
            info!(room = %room_id, model = %processed.model, "agent: posting reply");
            if let Err(e) = ctx
                .room_hub
                .send_message(&room_id, &ai_user_id, processed.content, MessageType::Text, Vec::new(), false, Some(trigger.id.clone()), None)
                .await
            {
                error!(room = %room_id, error = %e, "agent: failed to post reply");
            }
        }
        Ok(_) => info!(room = %room_id, "agent: empty reply, nothing posted"),
        Err(e) => error!(room = %room_id, error = %e, "agent: loop failed"),
    }
}
