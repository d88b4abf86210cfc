use axum::{extract::State, Json};
use serde_json::json;
use std::sync::Arc;

use super::{authorize, require};
use crate::api::rest::error::{ApiError, ApiResult};
use crate::sandbox::files::FileContent;
use crate::sandbox::FileOpError;
use crate::shared::models::{
    AppState, DeleteFileRequest, ListFilesRequest, ListFilesResponse, OkResponse,
    ReadFileRequest, RenameFileRequest, WriteFileRequest, WriteFileResponse,
};

pub async fn read_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReadFileRequest>,
) -> ApiResult<Json<FileContent>> {
    let sandbox = authorize(&state, &req.sandbox).await?;
    let path = require("path", &req.path)?;

    let content = state.files.read(&sandbox, path).await.map_err(|e| {
        ApiError::from(e).with_defaults(json!({ "content": "", "truncated": false }))
    })?;
    Ok(Json(content))
}

pub async fn write_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WriteFileRequest>,
) -> ApiResult<Json<WriteFileResponse>> {
    let sandbox = authorize(&state, &req.sandbox).await?;
    let path = require("path", &req.path)?;
    let content = req
        .content
        .as_deref()
        .ok_or(ApiError::MissingParameter("content"))?;

    let bytes_written = state
        .files
        .write(&sandbox, path, content)
        .await
        .map_err(|e| {
            let measured = match &e {
                FileOpError::SizeMismatch { actual, .. } => *actual,
                _ => 0,
            };
            ApiError::from(e).with_defaults(json!({ "bytes_written": measured }))
        })?;

    Ok(Json(WriteFileResponse {
        ok: true,
        bytes_written,
    }))
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ListFilesRequest>,
) -> ApiResult<Json<ListFilesResponse>> {
    let sandbox = authorize(&state, &req.sandbox).await?;
    let path = req.path.as_deref().filter(|p| !p.trim().is_empty());

    let entries = state
        .files
        .list(&sandbox, path)
        .await
        .map_err(|e| ApiError::from(e).with_defaults(json!({ "entries": [] })))?;
    Ok(Json(ListFilesResponse { entries }))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteFileRequest>,
) -> ApiResult<Json<OkResponse>> {
    let sandbox = authorize(&state, &req.sandbox).await?;
    let path = require("path", &req.path)?;

    state.files.delete(&sandbox, path).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn rename_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RenameFileRequest>,
) -> ApiResult<Json<OkResponse>> {
    let sandbox = authorize(&state, &req.sandbox).await?;
    let old_path = require("old_path", &req.old_path)?;
    let new_path = require("new_path", &req.new_path)?;

    state.files.rename(&sandbox, old_path, new_path).await?;
    Ok(Json(OkResponse::ok()))
}
