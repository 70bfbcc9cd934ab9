//! Error types for the command-execution sandbox.

use thiserror::Error;

/// All errors that can originate from sandboxed command execution.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Child-process spawn failed.
    #[error("spawn error: {0}")]
    PtySpawn(String),

    /// Underlying I/O failure (read, write, wait).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Operation exceeded its time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Command was rejected by the safety checker.
    #[error("Command blocked: {reason}")]
    CommandBlocked { reason: String },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TerminalError>;

impl From<TerminalError> for relayhub_core::HubError {
    fn from(e: TerminalError) -> Self {
        match e {
            TerminalError::CommandBlocked { reason } => relayhub_core::HubError::PermissionDenied { reason },
            TerminalError::Timeout { ms } => relayhub_core::HubError::UpstreamFailure(format!("timed out after {ms}ms")),
            other => relayhub_core::HubError::Internal(other.to_string()),
        }
    }
}
