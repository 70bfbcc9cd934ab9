//! Tool registry — builds the fixed tool catalog for a given room dispatch.

use std::sync::Arc;

use relayhub_core::RoomId;

use crate::pipeline::context::AgentContext;
use crate::provider::ToolDefinition;

use super::capability_probe::CapabilityProbeTool;
use super::create_downloadable::CreateDownloadableTool;
use super::execute_command::ExecuteCommandTool;
use super::list_files::ListFilesTool;
use super::read_file::ReadFileTool;
use super::save_chat_history::SaveChatHistoryTool;
use super::search_files::SearchFilesTool;
use super::{to_definitions, Tool};

/// Build the full list of tools available to the AI for one room dispatch.
///
/// Includes:
/// - `read_file`, `list_files`, `search_files` (filesystem, allowed-root gated)
/// - `execute_command` (one-shot sh -c via the sandbox executor)
/// - `save_chat_history`, `create_downloadable` (blob-store artifacts)
/// - `capability_probe` (static self-description)
pub fn build_tools(ctx: &AgentContext, room_id: RoomId) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(ReadFileTool::new(Arc::clone(&ctx.fs_policy))),
        Box::new(ListFilesTool::new(Arc::clone(&ctx.fs_policy))),
        Box::new(SearchFilesTool::new(Arc::clone(&ctx.fs_policy))),
        Box::new(ExecuteCommandTool::new(Arc::clone(&ctx.sandbox))),
        Box::new(SaveChatHistoryTool::new(room_id.clone(), Arc::clone(&ctx.room_hub), Arc::clone(&ctx.blob))),
        Box::new(CreateDownloadableTool::new(room_id, Arc::clone(&ctx.blob))),
        Box::new(CapabilityProbeTool),
    ]
}

/// Convert a tool list to API-level definitions for the LLM request.
pub fn tool_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    to_definitions(tools)
}
