use serde::{Deserialize, Serialize};

use crate::sandbox::CommandResult;

/// Identifies a sandbox and proves ownership of it. Shared by every
/// operation except create.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxRequest {
    #[serde(default)]
    pub sandbox_id: String,
    #[serde(default)]
    pub owner_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSandboxRequest {
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub github_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSandboxResponse {
    pub sandbox_id: String,
    pub owner_token: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecRequest {
    #[serde(flatten)]
    pub sandbox: SandboxRequest,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub workdir: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    /// Either stream was cut.
    pub truncated: bool,
    pub truncated_stdout: bool,
    pub truncated_stderr: bool,
}

impl From<CommandResult> for ExecResponse {
    fn from(result: CommandResult) -> Self {
        Self {
            truncated: result.truncated_stdout || result.truncated_stderr,
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
            truncated_stdout: result.truncated_stdout,
            truncated_stderr: result.truncated_stderr,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DiffResponse {
    pub diff: String,
    pub truncated: bool,
    pub git_status: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
