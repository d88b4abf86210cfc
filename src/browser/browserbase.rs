use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::cdp::CdpPage;
use super::{BrowserBackend, BrowserCredentials, BrowserError, BrowserPage, RemoteBrowserSession};
use crate::sandbox::executor::truncate_chars;
use crate::shared::config::BrowserConfig;

const API_KEY_HEADER: &str = "X-BB-API-Key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    id: String,
    #[serde(default)]
    connect_url: Option<String>,
}

/// Browserbase sessions over its REST API, pages over CDP.
pub struct BrowserbaseBackend {
    http: reqwest::Client,
    config: Arc<BrowserConfig>,
}

impl BrowserbaseBackend {
    pub fn new(http: reqwest::Client, config: Arc<BrowserConfig>) -> Self {
        Self { http, config }
    }

    async fn post(
        &self,
        url: &str,
        credentials: &BrowserCredentials,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, BrowserError> {
        let response = self
            .http
            .post(url)
            .timeout(Duration::from_millis(self.config.command_timeout_ms))
            .header(API_KEY_HEADER, &credentials.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrowserError::Execution(format!("Browserbase request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (body, _) = truncate_chars(body.trim(), 500);
            return Err(BrowserError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl BrowserBackend for BrowserbaseBackend {
    async fn create_session(
        &self,
        credentials: &BrowserCredentials,
    ) -> Result<RemoteBrowserSession, BrowserError> {
        let url = format!("{}/v1/sessions", self.config.api_url);
        let response = self
            .post(&url, credentials, json!({ "projectId": credentials.project_id }))
            .await?;
        let session: SessionResponse = response.json().await.map_err(|e| {
            BrowserError::Execution(format!("Invalid Browserbase session response: {e}"))
        })?;

        info!(session_id = %session.id, "Created Browserbase session");
        Ok(RemoteBrowserSession {
            session_id: session.id,
            connect_url: session.connect_url.filter(|u| !u.trim().is_empty()),
        })
    }

    async fn release_session(
        &self,
        credentials: &BrowserCredentials,
        session_id: &str,
    ) -> Result<(), BrowserError> {
        let url = format!("{}/v1/sessions/{}", self.config.api_url, session_id);
        self.post(
            &url,
            credentials,
            json!({
                "projectId": credentials.project_id,
                "status": "REQUEST_RELEASE",
            }),
        )
        .await?;
        debug!(session_id = %session_id, "Released Browserbase session");
        Ok(())
    }

    async fn open_page(&self, connect_url: &str) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let page = CdpPage::connect(connect_url, self.config.clone()).await?;
        Ok(Box::new(page))
    }
}
