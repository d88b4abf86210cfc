use axum::{extract::State, Json};
use std::sync::Arc;

use super::{authorize, require};
use crate::api::rest::error::ApiResult;
use crate::browser::{Extraction, Screenshot};
use crate::shared::models::{AppState, ExtractRequest, ScreenshotRequest};

pub async fn screenshot(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScreenshotRequest>,
) -> ApiResult<Json<Screenshot>> {
    let sandbox = authorize(&state, &req.sandbox).await?;
    let url = require("url", &req.url)?.trim();
    let credentials = state.browser.credentials(
        req.browserbase_api_key.as_deref(),
        req.browserbase_project_id.as_deref(),
    )?;

    tracing::info!(sandbox_id = %sandbox.id, url = %url, "Browser screenshot requested");
    let shot = state
        .browser
        .screenshot(credentials, url, req.full_page)
        .await?;
    Ok(Json(shot))
}

pub async fn extract(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExtractRequest>,
) -> ApiResult<Json<Extraction>> {
    let sandbox = authorize(&state, &req.sandbox).await?;
    let url = require("url", &req.url)?.trim();
    let credentials = state.browser.credentials(
        req.browserbase_api_key.as_deref(),
        req.browserbase_project_id.as_deref(),
    )?;

    tracing::info!(sandbox_id = %sandbox.id, url = %url, "Browser extraction requested");
    let extraction = state
        .browser
        .extract(credentials, url, req.instruction.as_deref())
        .await?;
    Ok(Json(extraction))
}
