use serde::Deserialize;

use super::sandbox::SandboxRequest;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScreenshotRequest {
    #[serde(flatten)]
    pub sandbox: SandboxRequest,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub full_page: bool,
    #[serde(default)]
    pub browserbase_api_key: Option<String>,
    #[serde(default)]
    pub browserbase_project_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractRequest {
    #[serde(flatten)]
    pub sandbox: SandboxRequest,
    #[serde(default)]
    pub url: String,
    /// Free text, or `selector:`/`css:` followed by a CSS selector.
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub browserbase_api_key: Option<String>,
    #[serde(default)]
    pub browserbase_project_id: Option<String>,
}
