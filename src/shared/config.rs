use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub clone: CloneConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    #[default]
    Docker,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub kind: PlatformKind,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: i64,
    #[serde(default)]
    pub network: Option<String>,
    /// Sandboxes exit on their own once this elapses.
    #[serde(default = "default_sandbox_timeout_secs")]
    pub sandbox_timeout_secs: u64,
    #[serde(default = "default_exec_timeout_secs")]
    pub exec_timeout_secs: u64,
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    #[serde(default = "default_owner_token_path")]
    pub owner_token_path: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            kind: PlatformKind::default(),
            image: default_image(),
            cpu_limit: default_cpu_limit(),
            memory_limit: default_memory_limit(),
            network: None,
            sandbox_timeout_secs: default_sandbox_timeout_secs(),
            exec_timeout_secs: default_exec_timeout_secs(),
            local_root: default_local_root(),
            workspace_root: default_workspace_root(),
            owner_token_path: default_owner_token_path(),
        }
    }
}

/// Character ceilings applied to everything handed back to callers.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_stdout_chars")]
    pub stdout_chars: usize,
    #[serde(default = "default_stderr_chars")]
    pub stderr_chars: usize,
    #[serde(default = "default_read_chars")]
    pub read_chars: usize,
    #[serde(default = "default_diff_chars")]
    pub diff_chars: usize,
    #[serde(default = "default_status_chars")]
    pub status_chars: usize,
    #[serde(default = "default_extract_chars")]
    pub extract_chars: usize,
    #[serde(default = "default_screenshot_max_bytes")]
    pub screenshot_max_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            stdout_chars: default_stdout_chars(),
            stderr_chars: default_stderr_chars(),
            read_chars: default_read_chars(),
            diff_chars: default_diff_chars(),
            status_chars: default_status_chars(),
            extract_chars: default_extract_chars(),
            screenshot_max_bytes: default_screenshot_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloneConfig {
    #[serde(default = "default_clone_base_url")]
    pub base_url: String,
    #[serde(default = "default_clone_depth")]
    pub depth: u32,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            base_url: default_clone_base_url(),
            depth: default_clone_depth(),
            default_branch: default_branch(),
            github_api_url: default_github_api_url(),
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_browserbase_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Hosts that skip the SSRF range checks entirely.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_network_idle_timeout_ms")]
    pub network_idle_timeout_ms: u64,
    /// Upper bound on any single Browserbase or DevTools call.
    #[serde(default = "default_browser_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            api_url: default_browserbase_api_url(),
            api_key: None,
            project_id: None,
            allowed_hosts: Vec::new(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            network_idle_timeout_ms: default_network_idle_timeout_ms(),
            command_timeout_ms: default_browser_command_timeout_ms(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl GatewayConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config at {}: {}", path.display(), e))?;
        let mut config: GatewayConfig = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Failed to parse config JSON at {}: {}", path.display(), e))?;
        config.normalize()?;
        Ok(config)
    }

    /// Loads the config file if present, otherwise falls back to defaults.
    /// Environment secrets fill in browser credentials left empty in the file.
    pub fn load(path: Option<PathBuf>) -> Result<(Self, Option<PathBuf>)> {
        let path = path.unwrap_or_else(resolve_config_path);
        let (mut config, loaded_from) = if path.exists() {
            (Self::load_from_path(&path)?, Some(path))
        } else {
            let mut config = Self::default();
            config.normalize()?;
            (config, None)
        };

        if config.browser.api_key.is_none() {
            config.browser.api_key = non_empty_env("BROWSERBASE_API_KEY");
        }
        if config.browser.project_id.is_none() {
            config.browser.project_id = non_empty_env("BROWSERBASE_PROJECT_ID");
        }

        Ok((config, loaded_from))
    }

    fn normalize(&mut self) -> Result<()> {
        self.clone.base_url = self.clone.base_url.trim().trim_end_matches('/').to_string();
        self.clone.github_api_url = self
            .clone
            .github_api_url
            .trim()
            .trim_end_matches('/')
            .to_string();
        self.browser.api_url = self.browser.api_url.trim().trim_end_matches('/').to_string();
        self.browser.allowed_hosts = self
            .browser
            .allowed_hosts
            .iter()
            .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        let workspace = self.platform.workspace_root.trim().trim_end_matches('/');
        if !workspace.starts_with('/') {
            return Err(anyhow!(
                "platform.workspace_root must be an absolute path, got '{}'",
                self.platform.workspace_root
            ));
        }
        self.platform.workspace_root = workspace.to_string();

        if !self.platform.owner_token_path.starts_with('/') {
            return Err(anyhow!(
                "platform.owner_token_path must be an absolute path, got '{}'",
                self.platform.owner_token_path
            ));
        }
        if self
            .platform
            .owner_token_path
            .starts_with(&format!("{}/", self.platform.workspace_root))
        {
            return Err(anyhow!(
                "platform.owner_token_path must live outside the workspace"
            ));
        }

        if self.clone.depth == 0 {
            self.clone.depth = default_clone_depth();
        }
        if self.browser.jpeg_quality == 0 || self.browser.jpeg_quality > 100 {
            self.browser.jpeg_quality = default_jpeg_quality();
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_image() -> String {
    "diffbox_sandbox:latest".to_string()
}

fn default_cpu_limit() -> f64 {
    1.0
}

fn default_memory_limit() -> i64 {
    2 * 1024 * 1024 * 1024
}

fn default_sandbox_timeout_secs() -> u64 {
    1800
}

fn default_exec_timeout_secs() -> u64 {
    300
}

fn default_local_root() -> PathBuf {
    std::env::temp_dir().join("diffbox-sandboxes")
}

fn default_workspace_root() -> String {
    "/workspace".to_string()
}

fn default_owner_token_path() -> String {
    "/var/lib/diffbox/.owner_token".to_string()
}

fn default_stdout_chars() -> usize {
    10_000
}

fn default_stderr_chars() -> usize {
    5_000
}

fn default_read_chars() -> usize {
    50_000
}

fn default_diff_chars() -> usize {
    20_000
}

fn default_status_chars() -> usize {
    2_000
}

fn default_extract_chars() -> usize {
    20_000
}

fn default_screenshot_max_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_clone_base_url() -> String {
    "https://github.com".to_string()
}

fn default_clone_depth() -> u32 {
    50
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_author_name() -> String {
    "Diff Sandbox".to_string()
}

fn default_author_email() -> String {
    "sandbox@diffbox.local".to_string()
}

fn default_browserbase_api_url() -> String {
    "https://api.browserbase.com".to_string()
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_network_idle_timeout_ms() -> u64 {
    5_000
}

fn default_browser_command_timeout_ms() -> u64 {
    30_000
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_jpeg_quality() -> u8 {
    60
}

pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("DIFFBOX_CONFIG_PATH") {
        return expand_path(path);
    }

    default_config_path()
}

pub fn expand_path(input: String) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}

fn default_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".diffbox")
        .join("diffbox.json")
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
