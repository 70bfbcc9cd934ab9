//! Shared data types for the command-execution sandbox.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ExecResult
// ---------------------------------------------------------------------------

/// Result returned by `exec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    /// Process exit code (0 = success).
    pub exit_code: i32,

    /// Captured standard output (ANSI escapes already stripped).
    pub stdout: String,

    /// Captured standard error (ANSI escapes already stripped).
    pub stderr: String,
}

// ---------------------------------------------------------------------------
// ExecOptions
// ---------------------------------------------------------------------------

/// Configuration knobs for one-shot command execution.
///
/// Callers that want sensible defaults can use `ExecOptions::default()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOptions {
    /// Timeout in seconds.  The child is killed if it runs longer.
    ///
    /// Clamped to a maximum of 300 seconds (5 minutes) to prevent accidental
    /// indefinite blocking of the agent.
    pub timeout_secs: u64,

    /// Maximum characters in the combined output before truncation.
    ///
    /// Middle-omission truncation is applied — see `truncate::truncate_output`.
    pub max_output_chars: usize,

    /// When `true`, the safety checker is bypassed entirely.
    ///
    /// Only set this for admin-level callers that have already validated the
    /// command through a separate policy layer.
    pub skip_safety: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_output_chars: 30_000,
            skip_safety: false,
        }
    }
}

impl ExecOptions {
    /// Clamp `timeout_secs` to the hard maximum (300 s).
    ///
    /// Called internally before spawning so callers cannot accidentally set a
    /// multi-hour timeout.
    pub(crate) fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.min(300)
    }
}
