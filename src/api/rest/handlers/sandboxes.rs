use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

use super::{authorize, require};
use crate::api::rest::error::ApiResult;
use crate::sandbox::DiffOutcome;
use crate::shared::models::{
    AppState, CreateSandboxRequest, CreateSandboxResponse, DiffResponse, ExecRequest,
    ExecResponse, OkResponse, SandboxRequest,
};

pub async fn create_sandbox(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSandboxRequest>,
) -> ApiResult<Json<CreateSandboxResponse>> {
    let created = state
        .lifecycle
        .create(
            &req.repo,
            req.branch.as_deref(),
            req.github_token.as_deref(),
        )
        .await?;

    Ok(Json(CreateSandboxResponse {
        sandbox_id: created.sandbox_id,
        owner_token: created.owner_token,
        status: "ready",
    }))
}

pub async fn cleanup_sandbox(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SandboxRequest>,
) -> ApiResult<Json<OkResponse>> {
    let sandbox_id = require("sandbox_id", &req.sandbox_id)?.trim();
    state
        .lifecycle
        .cleanup(sandbox_id, &req.owner_token)
        .await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn exec_command(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecRequest>,
) -> ApiResult<Json<ExecResponse>> {
    let sandbox = authorize(&state, &req.sandbox).await?;
    let command = require("command", &req.command)?;

    let result = state
        .executor
        .run(&sandbox, command, req.workdir.as_deref())
        .await?;
    info!(
        sandbox_id = %sandbox.id,
        exit_code = result.exit_code,
        "Command finished"
    );
    Ok(Json(result.into()))
}

pub async fn get_diff(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SandboxRequest>,
) -> ApiResult<Json<DiffResponse>> {
    let sandbox = authorize(&state, &req).await?;

    let response = match state.git.diff(&sandbox).await? {
        DiffOutcome::Clean => DiffResponse {
            diff: String::new(),
            truncated: false,
            git_status: "clean".to_string(),
        },
        DiffOutcome::Changes {
            diff,
            truncated,
            git_status,
        } => DiffResponse {
            diff,
            truncated,
            git_status,
        },
    };
    Ok(Json(response))
}
