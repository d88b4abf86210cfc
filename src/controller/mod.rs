pub mod docker_manager;
pub mod local_platform;

pub use docker_manager::DockerManager;
pub use local_platform::LocalPlatform;

use std::sync::Arc;
use tracing::info;

use crate::sandbox::platform::{PlatformError, SandboxPlatform};
use crate::shared::config::{PlatformConfig, PlatformKind};

/// Builds the sandbox backend selected in the configuration.
pub fn connect_platform(
    config: Arc<PlatformConfig>,
) -> Result<Arc<dyn SandboxPlatform>, PlatformError> {
    match config.kind {
        PlatformKind::Docker => {
            info!("Using Docker sandbox platform (image {})", config.image);
            Ok(Arc::new(DockerManager::connect(config)?))
        }
        PlatformKind::Local => {
            info!(
                "Using local sandbox platform at {}",
                config.local_root.display()
            );
            Ok(Arc::new(LocalPlatform::new(
                config.local_root.clone(),
                config.exec_timeout_secs,
            )))
        }
    }
}
