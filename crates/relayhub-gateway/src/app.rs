use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use relayhub_agent::pipeline::AgentContext;
use relayhub_core::config::HubConfig;
use relayhub_room::hub::RoomHub;
use relayhub_voice::VoiceManager;

/// Central shared state — passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: HubConfig,
    pub room_hub: Arc<RoomHub>,
    pub voice: Arc<VoiceManager>,
    pub agent_ctx: Arc<AgentContext>,
}

impl AppState {
    pub fn new(config: HubConfig, room_hub: Arc<RoomHub>, voice: Arc<VoiceManager>, agent_ctx: Arc<AgentContext>) -> Self {
        Self { config, room_hub, voice, agent_ctx }
    }
}

/// Assembles the full Axum router. Only `/health` (liveness) and `/ws`
/// (the upgrade) are implemented here — `/status`, `/memory`,
/// `/downloads/*`, and `/api/*` belong to collaborating services and are
/// not mounted by this binary.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
