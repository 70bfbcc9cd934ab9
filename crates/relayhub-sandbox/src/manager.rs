//! `CommandExecutor` — runs one-shot shell commands on behalf of the agent
//! tool catalog's `execute_command` tool, with safety gating, a hard
//! timeout, and output truncation.

use crate::{
    error::{Result, TerminalError},
    safety, truncate,
    types::{ExecOptions, ExecResult},
};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Executes shell commands with safety checking, timeout, and truncation.
///
/// Stateless — a single instance can be shared across every room and tool
/// call via `Arc`.
#[derive(Debug, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute `command` via `sh -c` with safety checking, timeout, and output
    /// truncation.
    ///
    /// Uses `tokio::process::Command` so the timeout future can race against
    /// the child without blocking the Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `CommandBlocked` — command was rejected by the safety checker.
    /// - `Timeout`        — child exceeded `options.timeout_secs`.
    /// - `PtySpawn`       — child could not be spawned.
    /// - `IoError`        — underlying I/O failure.
    pub async fn exec(&self, command: &str, options: ExecOptions) -> Result<ExecResult> {
        debug!("exec: {command}");

        if !options.skip_safety {
            safety::check_command(command).map_err(|reason| TerminalError::CommandBlocked { reason })?;
        }

        let timeout_secs = options.effective_timeout_secs();
        let timeout_duration = std::time::Duration::from_secs(timeout_secs);

        let child = AsyncCommand::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| TerminalError::PtySpawn(format!("spawn failed: {e}")))?;

        // `wait_with_output` takes `self` by value, so we drive it on a spawned
        // task and communicate back via a oneshot channel. We capture the PID
        // first so we can issue a SIGKILL on the timeout path.
        let pid = child.id();
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let _ = tx.send(child.wait_with_output().await);
        });

        match tokio::time::timeout(timeout_duration, rx).await {
            Ok(Ok(Ok(output))) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let stdout = truncate::truncate_output(&strip_text(&output.stdout), options.max_output_chars);
                let stderr = truncate::truncate_output(&strip_text(&output.stderr), options.max_output_chars);
                Ok(ExecResult { exit_code, stdout, stderr })
            }

            Ok(Ok(Err(e))) => Err(TerminalError::IoError(e)),

            Ok(Err(_recv_err)) => Err(TerminalError::PtySpawn("wait task panicked unexpectedly".to_string())),

            // Deadline expired — kill the child via its PID; we no longer own
            // the `Child` handle, so this is a raw SIGKILL by PID.
            Err(_elapsed) => {
                if let Some(raw_pid) = pid {
                    #[cfg(unix)]
                    unsafe {
                        libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                    }
                    #[cfg(not(unix))]
                    {
                        let _ = std::process::Command::new("taskkill")
                            .args(["/F", "/PID", &raw_pid.to_string()])
                            .output();
                    }
                }
                Err(TerminalError::Timeout { ms: timeout_secs * 1_000 })
            }
        }
    }
}

/// Strip ANSI escape codes and convert bytes to a UTF-8 string.
fn strip_text(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean).into_owned()
}
