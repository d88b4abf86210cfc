use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::ssrf::SsrfGuard;
use super::{
    BrowserBackend, BrowserCredentials, BrowserError, BrowserPage, ImageFormat, PageInfo,
};
use crate::sandbox::executor::truncate_chars;
use crate::shared::config::{BrowserConfig, LimitsConfig};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const SELECTOR_PREFIXES: &[&str] = &["selector:", "css:"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Screenshot {
    pub title: String,
    pub final_url: String,
    pub status_code: Option<u16>,
    pub mime_type: String,
    /// Base64-encoded image bytes.
    pub image: String,
    /// The full-fidelity capture was over budget and a viewport JPEG was
    /// returned instead.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Extraction {
    pub title: String,
    pub final_url: String,
    pub status_code: Option<u16>,
    pub content: String,
    pub truncated: bool,
}

enum Capture {
    Screenshot { full_page: bool },
    Text { selector: Option<String> },
}

enum Captured {
    Image {
        bytes: Vec<u8>,
        format: ImageFormat,
        downgraded: bool,
    },
    Text(String),
}

/// Releases the remote session when dropped, unless `release` already ran.
/// Covers handlers that are abandoned mid-flight.
struct SessionGuard {
    backend: Arc<dyn BrowserBackend>,
    credentials: BrowserCredentials,
    session_id: Option<String>,
}

impl SessionGuard {
    async fn release(mut self) {
        if let Some(session_id) = self.session_id.take() {
            release_quietly(self.backend.clone(), self.credentials.clone(), session_id).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session_id) = self.session_id.take() {
            let backend = self.backend.clone();
            let credentials = self.credentials.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(release_quietly(backend, credentials, session_id));
                }
                Err(_) => warn!(session_id = %session_id, "No runtime to release browser session"),
            }
        }
    }
}

async fn release_quietly(
    backend: Arc<dyn BrowserBackend>,
    credentials: BrowserCredentials,
    session_id: String,
) {
    if let Err(e) = backend.release_session(&credentials, &session_id).await {
        warn!(session_id = %session_id, "Failed to release browser session: {}", e);
    }
}

#[derive(Clone)]
pub struct BrowserAutomationProxy {
    backend: Arc<dyn BrowserBackend>,
    guard: SsrfGuard,
    config: Arc<BrowserConfig>,
    limits: Arc<LimitsConfig>,
}

impl BrowserAutomationProxy {
    pub fn new(
        backend: Arc<dyn BrowserBackend>,
        guard: SsrfGuard,
        config: Arc<BrowserConfig>,
        limits: Arc<LimitsConfig>,
    ) -> Self {
        Self {
            backend,
            guard,
            config,
            limits,
        }
    }

    /// Request-supplied credentials win; configured ones fill the gaps.
    pub fn credentials(
        &self,
        api_key: Option<&str>,
        project_id: Option<&str>,
    ) -> Result<BrowserCredentials, BrowserError> {
        let pick = |given: Option<&str>, configured: &Option<String>| {
            given
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .or_else(|| configured.clone().filter(|v| !v.trim().is_empty()))
        };
        match (
            pick(api_key, &self.config.api_key),
            pick(project_id, &self.config.project_id),
        ) {
            (Some(api_key), Some(project_id)) => Ok(BrowserCredentials {
                api_key,
                project_id,
            }),
            _ => Err(BrowserError::NotConfigured),
        }
    }

    pub async fn screenshot(
        &self,
        credentials: BrowserCredentials,
        url: &str,
        full_page: bool,
    ) -> Result<Screenshot, BrowserError> {
        let (page, captured) = self
            .run(credentials, url, Capture::Screenshot { full_page })
            .await?;
        match captured {
            Captured::Image {
                bytes,
                format,
                downgraded,
            } => Ok(Screenshot {
                title: page.title,
                final_url: page.final_url,
                status_code: page.status_code,
                mime_type: format.mime_type().to_string(),
                image: STANDARD.encode(bytes),
                truncated: downgraded,
            }),
            Captured::Text(_) => Err(BrowserError::Execution(
                "Unexpected capture result".to_string(),
            )),
        }
    }

    pub async fn extract(
        &self,
        credentials: BrowserCredentials,
        url: &str,
        instruction: Option<&str>,
    ) -> Result<Extraction, BrowserError> {
        let selector = instruction.and_then(parse_selector).map(str::to_string);
        let (page, captured) = self.run(credentials, url, Capture::Text { selector }).await?;
        let raw = match captured {
            Captured::Text(text) => text,
            Captured::Image { .. } => {
                return Err(BrowserError::Execution(
                    "Unexpected capture result".to_string(),
                ))
            }
        };

        let normalized = collapse_whitespace(&raw);
        if normalized.is_empty() {
            return Err(BrowserError::EmptyExtraction);
        }
        let (content, truncated) = truncate_chars(&normalized, self.limits.extract_chars);

        Ok(Extraction {
            title: page.title,
            final_url: page.final_url,
            status_code: page.status_code,
            content,
            truncated,
        })
    }

    async fn run(
        &self,
        credentials: BrowserCredentials,
        url: &str,
        capture: Capture,
    ) -> Result<(PageInfo, Captured), BrowserError> {
        let target = self.guard.check(url).await;
        if target.blocked {
            let reason = target.reason.unwrap_or_else(|| "URL is not allowed".to_string());
            warn!(
                url = %target.url,
                host = ?target.parsed_host,
                resolved = ?target.resolved_addresses,
                "Blocked browser target: {}", reason
            );
            return Err(BrowserError::InvalidUrl(reason));
        }

        let session = self.backend.create_session(&credentials).await?;
        let guard = SessionGuard {
            backend: self.backend.clone(),
            credentials,
            session_id: Some(session.session_id.clone()),
        };

        let result = match session.connect_url.as_deref() {
            Some(connect_url) => self.drive(connect_url, url, &capture).await,
            None => Err(BrowserError::ConnectUrlMissing),
        };
        guard.release().await;

        if let Err(e) = &result {
            warn!(session_id = %session.session_id, "Browser operation failed: {}", e);
        }
        result
    }

    async fn drive(
        &self,
        connect_url: &str,
        url: &str,
        capture: &Capture,
    ) -> Result<(PageInfo, Captured), BrowserError> {
        let mut page = self.backend.open_page(connect_url).await?;
        let result = self.capture(page.as_mut(), url, capture).await;
        page.close().await;
        result
    }

    async fn capture(
        &self,
        page: &mut dyn BrowserPage,
        url: &str,
        capture: &Capture,
    ) -> Result<(PageInfo, Captured), BrowserError> {
        let info = page.navigate(url).await?;
        info!(
            url = %url,
            final_url = %info.final_url,
            status = ?info.status_code,
            "Page loaded"
        );

        let captured = match capture {
            Capture::Screenshot { full_page } => self.capture_image(page, *full_page).await?,
            Capture::Text { selector } => Captured::Text(page.visible_text(selector.as_deref()).await?),
        };
        Ok((info, captured))
    }

    async fn capture_image(
        &self,
        page: &mut dyn BrowserPage,
        full_page: bool,
    ) -> Result<Captured, BrowserError> {
        let limit = self.limits.screenshot_max_bytes;

        let png = page.screenshot(ImageFormat::Png, full_page).await?;
        if png.len() <= limit {
            return Ok(Captured::Image {
                bytes: png,
                format: ImageFormat::Png,
                downgraded: false,
            });
        }

        info!(size = png.len(), limit, "Screenshot over budget, retrying as JPEG");
        let format = ImageFormat::Jpeg {
            quality: self.config.jpeg_quality,
        };
        let jpeg = page.screenshot(format, false).await?;
        if jpeg.len() > limit {
            return Err(BrowserError::ImageTooLarge {
                size: jpeg.len(),
                limit,
            });
        }
        Ok(Captured::Image {
            bytes: jpeg,
            format,
            downgraded: true,
        })
    }
}

/// `selector: main .content` or `css: #app`; anything else is free text.
fn parse_selector(instruction: &str) -> Option<&str> {
    let trimmed = instruction.trim();
    SELECTOR_PREFIXES.iter().find_map(|prefix| {
        let head = trimmed.get(..prefix.len())?;
        if !head.eq_ignore_ascii_case(prefix) {
            return None;
        }
        Some(trimmed[prefix.len()..].trim()).filter(|s| !s.is_empty())
    })
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text, " ").trim().to_string()
}
