use std::sync::Arc;

use crate::browser::{BrowserAutomationProxy, BrowserBackend, HostResolver, SsrfGuard};
use crate::sandbox::{
    CommandExecutor, FileOperationsService, GitDiffCollector, OwnerTokenAuthority,
    SandboxLifecycle, SandboxPlatform,
};
use crate::shared::config::GatewayConfig;

pub mod browser;
pub mod file;
pub mod sandbox;

pub use browser::{ExtractRequest, ScreenshotRequest};
pub use file::{
    DeleteFileRequest, ListFilesRequest, ListFilesResponse, ReadFileRequest, RenameFileRequest,
    WriteFileRequest, WriteFileResponse,
};
pub use sandbox::{
    CreateSandboxRequest, CreateSandboxResponse, DiffResponse, ExecRequest, ExecResponse,
    OkResponse, SandboxRequest,
};

// Application state
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: SandboxLifecycle,
    pub executor: CommandExecutor,
    pub files: FileOperationsService,
    pub git: GitDiffCollector,
    pub browser: BrowserAutomationProxy,
}

impl AppState {
    pub fn new(
        config: Arc<GatewayConfig>,
        platform: Arc<dyn SandboxPlatform>,
        browser_backend: Arc<dyn BrowserBackend>,
        resolver: Arc<dyn HostResolver>,
        http: reqwest::Client,
    ) -> Self {
        let limits = Arc::new(config.limits.clone());
        let lifecycle = SandboxLifecycle::new(
            platform.clone(),
            OwnerTokenAuthority::new(platform.clone()),
            Arc::new(config.clone.clone()),
            http,
        );
        let guard = SsrfGuard::new(config.browser.allowed_hosts.clone(), resolver);
        let browser = BrowserAutomationProxy::new(
            browser_backend,
            guard,
            Arc::new(config.browser.clone()),
            limits.clone(),
        );

        Self {
            lifecycle,
            executor: CommandExecutor::new(platform.clone(), limits.clone()),
            files: FileOperationsService::new(platform.clone(), limits.clone()),
            git: GitDiffCollector::new(platform, limits),
            browser,
        }
    }
}
