use serde::{Deserialize, Serialize};

use super::sandbox::SandboxRequest;
use crate::sandbox::FileEntry;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadFileRequest {
    #[serde(flatten)]
    pub sandbox: SandboxRequest,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WriteFileRequest {
    #[serde(flatten)]
    pub sandbox: SandboxRequest,
    #[serde(default)]
    pub path: String,
    /// Required, but an empty string is a valid (empty) file.
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WriteFileResponse {
    pub ok: bool,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFilesRequest {
    #[serde(flatten)]
    pub sandbox: SandboxRequest,
    /// Defaults to the workspace root.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub entries: Vec<FileEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteFileRequest {
    #[serde(flatten)]
    pub sandbox: SandboxRequest,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenameFileRequest {
    #[serde(flatten)]
    pub sandbox: SandboxRequest,
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_path: String,
}
