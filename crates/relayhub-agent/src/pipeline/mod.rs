//! The agent's message pipeline — turns a room @mention into an assistant
//! reply, with an auto-save side channel and a Summary Manager running
//! alongside it.

pub mod context;
pub mod process;
pub mod summary;

pub use context::AgentContext;
pub use process::{process_message, ProcessedMessage};
