use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::executor::truncate_chars;
use super::platform::{argv, PlatformError, SandboxHandle, SandboxPlatform};
use crate::shared::config::LimitsConfig;

/// The three outcomes a caller has to tell apart. Failures travel as
/// `DiffError` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    Clean,
    Changes {
        diff: String,
        truncated: bool,
        git_status: String,
    },
}

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("git status failed: {0}")]
    Status(String),

    #[error("git add failed: {0}")]
    Stage(String),

    #[error("git diff failed: {0}")]
    Diff(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

#[derive(Clone)]
pub struct GitDiffCollector {
    platform: Arc<dyn SandboxPlatform>,
    limits: Arc<LimitsConfig>,
}

impl GitDiffCollector {
    pub fn new(platform: Arc<dyn SandboxPlatform>, limits: Arc<LimitsConfig>) -> Self {
        Self { platform, limits }
    }

    pub async fn diff(&self, sandbox: &SandboxHandle) -> Result<DiffOutcome, DiffError> {
        let workspace = sandbox.layout.workspace.as_str();

        // An interrupted git process leaves index.lock behind and blocks `git add`
        let lock = format!("{workspace}/.git/index.lock");
        match self
            .platform
            .exec(sandbox, argv(["rm", "-f", "--", lock.as_str()]))
            .await
        {
            Ok(out) if !out.success() => {
                debug!(sandbox_id = %sandbox.id, "Stale lock removal failed: {}", out.stderr_lossy());
            }
            Err(e) => debug!(sandbox_id = %sandbox.id, "Stale lock removal failed: {}", e),
            Ok(_) => {}
        }

        let status = self
            .platform
            .exec(
                sandbox,
                argv(["git", "-C", workspace, "status", "--porcelain"]),
            )
            .await?;
        let status_err = status.stderr_lossy();
        if !status.success() || !status_err.trim().is_empty() {
            return Err(DiffError::Status(status_err.trim().to_string()));
        }

        let status_out = status.stdout_lossy();
        if status_out.trim().is_empty() {
            info!(sandbox_id = %sandbox.id, "Working tree clean");
            return Ok(DiffOutcome::Clean);
        }

        let add = self
            .platform
            .exec(sandbox, argv(["git", "-C", workspace, "add", "-A"]))
            .await?;
        if !add.success() {
            return Err(DiffError::Stage(add.stderr_lossy().trim().to_string()));
        }

        let diff = self
            .platform
            .exec(
                sandbox,
                argv(["git", "-C", workspace, "diff", "--cached", "--no-color"]),
            )
            .await?;
        if !diff.success() {
            return Err(DiffError::Diff(diff.stderr_lossy().trim().to_string()));
        }

        let (diff, truncated) = truncate_chars(&diff.stdout_lossy(), self.limits.diff_chars);
        let (git_status, _) = truncate_chars(&status_out, self.limits.status_chars);

        info!(
            sandbox_id = %sandbox.id,
            diff_chars = diff.len(),
            truncated,
            "Collected staged diff"
        );
        Ok(DiffOutcome::Changes {
            diff,
            truncated,
            git_status,
        })
    }
}
