use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::platform::{bash_script, PlatformError, SandboxHandle, SandboxPlatform};
use crate::shared::config::LimitsConfig;

// The command is evaluated as a whole script; the directory is a parameter.
const EXEC_SCRIPT: &str = r#"cd -- "$1" && eval "$2""#;

/// Normalized result of a caller's shell command. A non-zero exit code is a
/// regular result; callers decide what it means.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub truncated_stdout: bool,
    pub truncated_stderr: bool,
}

#[derive(Clone)]
pub struct CommandExecutor {
    platform: Arc<dyn SandboxPlatform>,
    limits: Arc<LimitsConfig>,
}

impl CommandExecutor {
    pub fn new(platform: Arc<dyn SandboxPlatform>, limits: Arc<LimitsConfig>) -> Self {
        Self { platform, limits }
    }

    /// Runs `command` through bash with `workdir` (default: the workspace) as
    /// the current directory. Only transport failures are errors.
    pub async fn run(
        &self,
        sandbox: &SandboxHandle,
        command: &str,
        workdir: Option<&str>,
    ) -> Result<CommandResult, PlatformError> {
        let workdir = workdir
            .filter(|w| !w.trim().is_empty())
            .unwrap_or(&sandbox.layout.workspace);

        info!(sandbox_id = %sandbox.id, workdir = %workdir, "Executing command");

        let out = self
            .platform
            .exec(sandbox, bash_script(EXEC_SCRIPT, [workdir, command]))
            .await?;

        let (stdout, truncated_stdout) =
            truncate_chars(&out.stdout_lossy(), self.limits.stdout_chars);
        let (stderr, truncated_stderr) =
            truncate_chars(&out.stderr_lossy(), self.limits.stderr_chars);

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code: out.exit_code,
            truncated_stdout,
            truncated_stderr,
        })
    }
}

/// Keeps the first `max` characters (not bytes) of `s`.
pub fn truncate_chars(s: &str, max: usize) -> (String, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (s[..idx].to_string(), true),
        None => (s.to_string(), false),
    }
}
