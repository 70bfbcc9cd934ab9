//! One-shot command execution for the agent's `execute_command` tool.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use relayhub_sandbox::manager::CommandExecutor;
//! use relayhub_sandbox::types::ExecOptions;
//!
//! #[tokio::main]
//! async fn main() {
//!     let exec = CommandExecutor::new();
//!
//!     // Safe one-shot exec with a 30-second timeout.
//!     let result = exec.exec("echo hello", ExecOptions::default()).await.unwrap();
//!     println!("{}", result.stdout);
//! }
//! ```

pub mod error;
pub mod manager;
pub mod safety;
pub mod truncate;
pub mod types;

pub use error::{Result, TerminalError};
pub use manager::CommandExecutor;
pub use types::{ExecOptions, ExecResult};
