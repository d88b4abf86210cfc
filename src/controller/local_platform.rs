use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::sandbox::platform::{
    ExecOutput, PlatformError, SandboxHandle, SandboxLayout, SandboxPlatform,
};

/// Development backend: every sandbox is a directory under `root` and
/// commands run as host processes. Provides no isolation whatsoever.
pub struct LocalPlatform {
    root: PathBuf,
    exec_timeout_secs: u64,
}

impl LocalPlatform {
    pub fn new(root: PathBuf, exec_timeout_secs: u64) -> Self {
        Self {
            root,
            exec_timeout_secs,
        }
    }

    fn sandbox_dir(&self, sandbox_id: &str) -> PathBuf {
        self.root.join(sandbox_id)
    }

    fn handle_for(&self, sandbox_id: &str) -> SandboxHandle {
        let dir = self.sandbox_dir(sandbox_id);
        SandboxHandle {
            id: sandbox_id.to_string(),
            layout: SandboxLayout {
                root: path_string(&dir),
                workspace: path_string(&dir.join("workspace")),
                owner_token_path: path_string(&dir.join(".diffbox").join("owner_token")),
            },
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl SandboxPlatform for LocalPlatform {
    async fn provision(&self) -> Result<SandboxHandle, PlatformError> {
        let sandbox_id = Uuid::new_v4().to_string();
        tokio::fs::create_dir_all(self.sandbox_dir(&sandbox_id)).await?;
        info!("Provisioned local sandbox {}", sandbox_id);
        Ok(self.handle_for(&sandbox_id))
    }

    async fn resolve(&self, sandbox_id: &str) -> Result<SandboxHandle, PlatformError> {
        if Uuid::parse_str(sandbox_id).is_err() {
            return Err(PlatformError::InvalidId(sandbox_id.to_string()));
        }
        if !tokio::fs::try_exists(self.sandbox_dir(sandbox_id)).await? {
            return Err(PlatformError::NotFound(sandbox_id.to_string()));
        }
        Ok(self.handle_for(sandbox_id))
    }

    async fn exec(
        &self,
        sandbox: &SandboxHandle,
        argv: Vec<String>,
    ) -> Result<ExecOutput, PlatformError> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            PlatformError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ))
        })?;

        let child = Command::new(program)
            .args(args)
            .current_dir(&sandbox.layout.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.exec_timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| PlatformError::Timeout(self.exec_timeout_secs))??;

        Ok(ExecOutput {
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn terminate(&self, sandbox: &SandboxHandle) -> Result<(), PlatformError> {
        match tokio::fs::remove_dir_all(self.sandbox_dir(&sandbox.id)).await {
            Ok(()) => {
                info!("Removed local sandbox {}", sandbox.id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Local sandbox {} already removed, treating as success",
                    sandbox.id
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
