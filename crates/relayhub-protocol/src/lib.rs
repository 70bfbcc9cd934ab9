//! Wire protocol: the binary dialog-provider frame codec (C1) and the hub's
//! own client-facing JSON envelope (§6).

pub mod client;
pub mod codec;
pub mod frames;
pub mod message;
pub mod server;

pub use client::ClientMessage;
pub use message::ChatMessage;
pub use server::{FileInfo, ServerEvent};
