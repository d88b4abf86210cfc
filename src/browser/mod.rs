// Remote browser automation behind an SSRF gate
pub mod browserbase;
pub mod cdp;
pub mod proxy;
pub mod ssrf;

pub use browserbase::BrowserbaseBackend;
pub use proxy::{BrowserAutomationProxy, Extraction, Screenshot};
pub use ssrf::{HostResolver, SsrfGuard, SystemResolver};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browserbase credentials are not configured")]
    NotConfigured,

    #[error("{0}")]
    InvalidUrl(String),

    #[error("Browserbase session did not return a connect URL")]
    ConnectUrlMissing,

    #[error("Browserbase returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Browser execution failed: {0}")]
    Execution(String),

    #[error("Screenshot is {size} bytes, above the {limit} byte limit")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("No text could be extracted from the page")]
    EmptyExtraction,
}

impl BrowserError {
    pub fn code(&self) -> &'static str {
        match self {
            BrowserError::NotConfigured => "BROWSERBASE_NOT_CONFIGURED",
            BrowserError::InvalidUrl(_) => "INVALID_URL",
            BrowserError::ConnectUrlMissing => "BROWSER_CONNECT_URL_MISSING",
            BrowserError::Http { .. } => "BROWSERBASE_HTTP_ERROR",
            BrowserError::Execution(_) => "BROWSERBASE_EXECUTION_ERROR",
            BrowserError::ImageTooLarge { .. } => "IMAGE_TOO_LARGE",
            BrowserError::EmptyExtraction => "EMPTY_EXTRACTION",
        }
    }
}

#[derive(Clone)]
pub struct BrowserCredentials {
    pub api_key: String,
    pub project_id: String,
}

impl std::fmt::Debug for BrowserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserCredentials")
            .field("api_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// A remote browser session. Lives for exactly one gateway request.
#[derive(Debug, Clone)]
pub struct RemoteBrowserSession {
    pub session_id: String,
    pub connect_url: Option<String>,
}

/// What the page reported after navigation settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub status_code: Option<u16>,
    pub final_url: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg { quality: u8 },
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg { .. } => "image/jpeg",
        }
    }
}

/// Session infrastructure: hands out remote browsers and takes them back.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn create_session(
        &self,
        credentials: &BrowserCredentials,
    ) -> Result<RemoteBrowserSession, BrowserError>;

    async fn release_session(
        &self,
        credentials: &BrowserCredentials,
        session_id: &str,
    ) -> Result<(), BrowserError>;

    async fn open_page(&self, connect_url: &str) -> Result<Box<dyn BrowserPage>, BrowserError>;
}

/// One page inside a remote browser.
#[async_trait]
pub trait BrowserPage: Send {
    async fn navigate(&mut self, url: &str) -> Result<PageInfo, BrowserError>;

    async fn screenshot(
        &mut self,
        format: ImageFormat,
        full_page: bool,
    ) -> Result<Vec<u8>, BrowserError>;

    /// Visible text of the element matching `selector`, or of the whole body
    /// when there is no selector or it matches nothing.
    async fn visible_text(&mut self, selector: Option<&str>) -> Result<String, BrowserError>;

    async fn close(&mut self);
}
