use async_trait::async_trait;
use bollard::{
    container::{Config, CreateContainerOptions, LogOutput, RemoveContainerOptions},
    exec::{CreateExecOptions, StartExecResults},
    models::HostConfig,
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::sandbox::platform::{
    ExecOutput, PlatformError, SandboxHandle, SandboxLayout, SandboxPlatform,
};
use crate::shared::config::PlatformConfig;

/// Sandboxes as Docker containers. Each container runs a bounded `sleep`, so
/// an abandoned sandbox exits by itself and `auto_remove` cleans it up.
pub struct DockerManager {
    docker: Docker,
    config: Arc<PlatformConfig>,
}

impl DockerManager {
    pub fn new(docker: Docker, config: Arc<PlatformConfig>) -> Self {
        Self { docker, config }
    }

    pub fn connect(config: Arc<PlatformConfig>) -> Result<Self, PlatformError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker, config))
    }

    // Container name is derived from the sandbox ID
    fn container_name(&self, sandbox_id: &str) -> String {
        format!("diffbox_sandbox_{}", sandbox_id)
    }

    fn handle_for(&self, sandbox_id: &str) -> SandboxHandle {
        SandboxHandle {
            id: sandbox_id.to_string(),
            layout: SandboxLayout {
                root: "/".to_string(),
                workspace: self.config.workspace_root.clone(),
                owner_token_path: self.config.owner_token_path.clone(),
            },
        }
    }

    async fn remove(&self, container_name: &str) -> Result<(), PlatformError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self
            .docker
            .remove_container(container_name, Some(options))
            .await
        {
            Ok(_) => {
                info!("Container {} removed", container_name);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                warn!(
                    "Container {} already removed or doesn't exist, treating as success",
                    container_name
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to remove container {}: {}", container_name, e);
                Err(e.into())
            }
        }
    }

    async fn exec_collect(
        &self,
        container_name: &str,
        cmd: Vec<String>,
    ) -> Result<ExecOutput, PlatformError> {
        let exec_config = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_name, exec_config)
            .await
            .map_err(|e| map_missing(e, container_name))?;

        let mut out_buf: Vec<u8> = Vec::new();
        let mut err_buf: Vec<u8> = Vec::new();
        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(frame) = output.next().await {
                match frame? {
                    LogOutput::StdOut { message } => out_buf.extend_from_slice(&message),
                    LogOutput::StdErr { message } => err_buf.extend_from_slice(&message),
                    LogOutput::Console { message } => out_buf.extend_from_slice(&message),
                    LogOutput::StdIn { .. } => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout: out_buf,
            stderr: err_buf,
        })
    }
}

fn map_missing(e: bollard::errors::Error, container_name: &str) -> PlatformError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }
        | bollard::errors::Error::DockerResponseServerError {
            status_code: 409, ..
        } => PlatformError::NotFound(container_name.to_string()),
        other => other.into(),
    }
}

#[async_trait]
impl SandboxPlatform for DockerManager {
    async fn provision(&self) -> Result<SandboxHandle, PlatformError> {
        let sandbox_id = Uuid::new_v4().to_string();
        let container_name = self.container_name(&sandbox_id);

        info!(
            "Creating container {} with sandbox image {}",
            container_name, self.config.image
        );

        let mut labels = HashMap::new();
        labels.insert("diffbox.sandbox_id".to_string(), sandbox_id.clone());
        labels.insert("diffbox.managed".to_string(), "true".to_string());
        labels.insert(
            "diffbox.created_at".to_string(),
            chrono::Utc::now().to_rfc3339(),
        );

        let config = Config {
            image: Some(self.config.image.clone()),
            hostname: Some(format!("sandbox-{}", &sandbox_id[..8])),
            labels: Some(labels),
            cmd: Some(vec![
                "sleep".to_string(),
                self.config.sandbox_timeout_secs.to_string(),
            ]),
            working_dir: Some("/".to_string()),
            host_config: Some(HostConfig {
                cpu_quota: Some((self.config.cpu_limit * 100000.0) as i64),
                cpu_period: Some(100000),
                memory: Some(self.config.memory_limit),
                memory_swap: Some(self.config.memory_limit),
                network_mode: self.config.network.clone(),
                auto_remove: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_name.clone(),
            ..Default::default()
        };

        self.docker.create_container(Some(options), config).await?;

        if let Err(e) = self
            .docker
            .start_container::<String>(&container_name, None)
            .await
        {
            error!("Failed to start container {}: {}", container_name, e);
            let _ = self.remove(&container_name).await;
            return Err(e.into());
        }

        info!("Container {} started", container_name);
        Ok(self.handle_for(&sandbox_id))
    }

    async fn resolve(&self, sandbox_id: &str) -> Result<SandboxHandle, PlatformError> {
        if Uuid::parse_str(sandbox_id).is_err() {
            return Err(PlatformError::InvalidId(sandbox_id.to_string()));
        }
        let container_name = self.container_name(sandbox_id);

        match self.docker.inspect_container(&container_name, None).await {
            Ok(info) => {
                let managed = info
                    .config
                    .as_ref()
                    .and_then(|c| c.labels.as_ref())
                    .and_then(|l| l.get("diffbox.managed"))
                    .map(|v| v == "true")
                    .unwrap_or(false);
                let running = info
                    .state
                    .as_ref()
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                if managed && running {
                    Ok(self.handle_for(sandbox_id))
                } else {
                    info!("Sandbox {} container exists but is not usable", sandbox_id);
                    Err(PlatformError::NotFound(sandbox_id.to_string()))
                }
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(PlatformError::NotFound(sandbox_id.to_string())),
            Err(e) => {
                error!("Failed to inspect sandbox {} container: {}", sandbox_id, e);
                Err(PlatformError::Unavailable(e.to_string()))
            }
        }
    }

    async fn exec(
        &self,
        sandbox: &SandboxHandle,
        argv: Vec<String>,
    ) -> Result<ExecOutput, PlatformError> {
        let container_name = self.container_name(&sandbox.id);
        let timeout = self.config.exec_timeout_secs;

        tokio::time::timeout(
            Duration::from_secs(timeout),
            self.exec_collect(&container_name, argv),
        )
        .await
        .map_err(|_| PlatformError::Timeout(timeout))?
    }

    async fn terminate(&self, sandbox: &SandboxHandle) -> Result<(), PlatformError> {
        let container_name = self.container_name(&sandbox.id);
        info!("Terminating container {}", container_name);
        self.remove(&container_name).await
    }
}
