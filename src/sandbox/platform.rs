use async_trait::async_trait;
use thiserror::Error;

/// Where things live inside one sandbox's filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLayout {
    /// Filesystem root of the sandbox (`/` inside a container).
    pub root: String,
    /// Cloned repository working tree.
    pub workspace: String,
    /// Owner token file, outside the workspace so it never shows up in a diff.
    pub owner_token_path: String,
}

/// Opaque reference to a sandbox owned by the platform. Resolved per call,
/// never cached by the gateway.
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    pub id: String,
    pub layout: SandboxLayout,
}

/// Raw result of one process run inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Sandbox {0} not found")]
    NotFound(String),

    #[error("Invalid sandbox id: {0}")]
    InvalidId(String),

    #[error("Command timed out after {0}s")]
    Timeout(u64),

    #[error("Sandbox platform unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// The provisioning and isolation platform. The gateway only ever runs argv
/// vectors through it; shells are spawned explicitly by callers that need one.
#[async_trait]
pub trait SandboxPlatform: Send + Sync {
    async fn provision(&self) -> Result<SandboxHandle, PlatformError>;

    async fn resolve(&self, sandbox_id: &str) -> Result<SandboxHandle, PlatformError>;

    async fn exec(
        &self,
        sandbox: &SandboxHandle,
        argv: Vec<String>,
    ) -> Result<ExecOutput, PlatformError>;

    async fn terminate(&self, sandbox: &SandboxHandle) -> Result<(), PlatformError>;
}

/// Builds an argv from string-like parts.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Runs `script` under bash with every value passed as a positional
/// parameter (`$1`, `$2`, ...), so nothing user-supplied is spliced into the
/// script text.
pub fn bash_script<I, S>(script: &str, params: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut cmd = vec![
        "bash".to_string(),
        "-c".to_string(),
        script.to_string(),
        "diffbox".to_string(),
    ];
    cmd.extend(params.into_iter().map(Into::into));
    cmd
}

/// POSIX parent directory of an absolute or relative path, as a string.
pub fn parent_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None if path.starts_with('/') => "/".to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dir_handles_edge_cases() {
        assert_eq!(parent_dir("/workspace/src/main.rs"), "/workspace/src");
        assert_eq!(parent_dir("/workspace/dir/"), "/workspace");
        assert_eq!(parent_dir("/file"), "/");
        assert_eq!(parent_dir("file.txt"), ".");
        assert_eq!(parent_dir("a/b"), "a");
        assert_eq!(parent_dir("/"), "/");
    }

    #[test]
    fn bash_script_keeps_values_out_of_script_text() {
        let cmd = bash_script("printf %s \"$1\"", ["it's; rm -rf /"]);
        assert_eq!(cmd[0], "bash");
        assert_eq!(cmd[2], "printf %s \"$1\"");
        assert_eq!(cmd[3], "diffbox");
        assert_eq!(cmd[4], "it's; rm -rf /");
    }
}
