use std::net::SocketAddr;
use std::sync::Arc;

use relayhub_agent::anthropic::AnthropicClient;
use relayhub_agent::fspolicy::FsPolicy;
use relayhub_agent::pipeline::AgentContext;
use relayhub_agent::AgentHandle;
use relayhub_blob::fs::FsBlobStore;
use relayhub_core::config::HubConfig;
use relayhub_reaper::Reaper;
use relayhub_room::hub::RoomHub;
use relayhub_sandbox::CommandExecutor;
use relayhub_store::sqlite::SqliteStore;
use relayhub_voice::VoiceManager;
use tokio::sync::watch;
use tracing::info;

mod app;
mod auth;
mod http;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relayhub_gateway=info,tower_http=debug".into()),
        )
        .init();

    // load config: explicit path > RELAYHUB_CONFIG env > ./config.toml
    let config_path = std::env::var("RELAYHUB_CONFIG").ok();
    let config = HubConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        HubConfig::default()
    });

    let store: Arc<dyn relayhub_store::MessageStore> = Arc::new(SqliteStore::open(&config.database.path)?);
    let blob: Arc<dyn relayhub_blob::BlobStore> = Arc::new(FsBlobStore::new(
        config.blob.root.clone(),
        format!("http://{}:{}/downloads", config.gateway.bind, config.gateway.port),
        config.blob.signing_secret.clone(),
    ));

    let room_hub = Arc::new(RoomHub::new(store.clone(), blob.clone(), config.auth.allow_anonymous));

    let sandbox = Arc::new(CommandExecutor::new());
    let fs_policy = Arc::new(FsPolicy::new(config.agent.allowed_read_paths.clone()));
    let llm: Arc<dyn relayhub_agent::provider::LlmClient> =
        Arc::new(AnthropicClient::new(config.agent.api_key.clone(), config.agent.base_url.clone()));

    let agent_ctx = Arc::new(AgentContext::new(
        store.clone(),
        blob.clone(),
        room_hub.clone(),
        sandbox,
        fs_policy,
        llm,
        config.agent.model.clone(),
        config.agent.max_iterations,
        config.agent.auto_save_threshold,
        config.agent.auto_save_keep_count,
    ));
    room_hub.set_agent_dispatcher(Arc::new(AgentHandle::new(agent_ctx.clone())));

    let voice = Arc::new(VoiceManager::new(&config.voice));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = Reaper::new(room_hub.clone(), store.clone(), voice.clone(), &config.reaper);
    tokio::spawn(reaper.run(shutdown_rx));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, room_hub, voice, agent_ctx));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("relayhub gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}
