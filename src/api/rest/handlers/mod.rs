pub mod browser;
pub mod files;
pub mod sandboxes;

use crate::api::rest::error::{ApiError, ApiResult};
use crate::sandbox::SandboxHandle;
use crate::shared::models::{AppState, SandboxRequest};

/// Required string field; blank counts as missing.
pub(crate) fn require<'a>(name: &'static str, value: &'a str) -> ApiResult<&'a str> {
    if value.trim().is_empty() {
        return Err(ApiError::MissingParameter(name));
    }
    Ok(value)
}

/// Resolves the sandbox and checks its owner token before anything else runs.
pub(crate) async fn authorize(state: &AppState, request: &SandboxRequest) -> ApiResult<SandboxHandle> {
    let sandbox_id = require("sandbox_id", &request.sandbox_id)?.trim();
    if request.owner_token.is_empty() {
        return Err(ApiError::Unauthorized);
    }
    Ok(state
        .lifecycle
        .authorize(sandbox_id, &request.owner_token)
        .await?)
}
