//! Shared context for the agent's message pipeline.
//!
//! One `AgentContext` is built at gateway startup and shared across all
//! rooms — there is exactly one channel (the Room Hub), so unlike the
//! original multi-adapter design this is a concrete struct of `Arc`s
//! rather than a trait implemented per-channel.

use std::sync::Arc;

use relayhub_blob::BlobStore;
use relayhub_room::hub::RoomHub;
use relayhub_sandbox::CommandExecutor;
use relayhub_store::MessageStore;

use crate::fspolicy::FsPolicy;
use crate::provider::LlmClient;

#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<dyn MessageStore>,
    pub blob: Arc<dyn BlobStore>,
    pub room_hub: Arc<RoomHub>,
    pub sandbox: Arc<CommandExecutor>,
    pub fs_policy: Arc<FsPolicy>,
    pub llm: Arc<dyn LlmClient>,
    pub model: String,
    pub max_iterations: usize,
    pub auto_save_threshold: usize,
    pub auto_save_keep_count: usize,
}

impl AgentContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn MessageStore>,
        blob: Arc<dyn BlobStore>,
        room_hub: Arc<RoomHub>,
        sandbox: Arc<CommandExecutor>,
        fs_policy: Arc<FsPolicy>,
        llm: Arc<dyn LlmClient>,
        model: String,
        max_iterations: usize,
        auto_save_threshold: usize,
        auto_save_keep_count: usize,
    ) -> Self {
        Self {
            store,
            blob,
            room_hub,
            sandbox,
            fs_policy,
            llm,
            model,
            max_iterations,
            auto_save_threshold,
            auto_save_keep_count,
        }
    }
}
