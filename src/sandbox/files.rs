use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::executor::truncate_chars;
use super::platform::{
    argv, bash_script, parent_dir, PlatformError, SandboxHandle, SandboxPlatform,
};
use crate::shared::config::LimitsConfig;

// Stays well under the kernel's per-argument limit (MAX_ARG_STRLEN, 128 KiB).
const UPLOAD_CHUNK_CHARS: usize = 64 * 1024;

const UPLOAD_FIRST_CHUNK: &str = r#"umask 077 && printf '%s' "$2" > "$1""#;
const UPLOAD_NEXT_CHUNK: &str = r#"printf '%s' "$2" >> "$1""#;
const UPLOAD_DECODE: &str =
    r#"base64 -d -- "$1" > "$2"; status=$?; rm -f -- "$1"; exit $status"#;
const LIST_DIR: &str = r#"[ -d "$1" ] || { echo "not a directory: $1" >&2; exit 2; }
exec find "$1" -mindepth 1 -maxdepth 1 -printf '%y\0%s\0%f\0'"#;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub kind: FileKind,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileContent {
    pub content: String,
    pub truncated: bool,
}

#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Failed to create parent directory: {0}")]
    CreateParentFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Could not verify written file: {0}")]
    VerifyFailed(String),

    #[error("Write verification mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("Failed to parse directory listing: {0}")]
    ListParse(String),

    #[error("Refusing to modify protected path {0}")]
    ProtectedPath(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Rename failed: {0}")]
    RenameFailed(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

#[derive(Clone)]
pub struct FileOperationsService {
    platform: Arc<dyn SandboxPlatform>,
    limits: Arc<LimitsConfig>,
}

impl FileOperationsService {
    pub fn new(platform: Arc<dyn SandboxPlatform>, limits: Arc<LimitsConfig>) -> Self {
        Self { platform, limits }
    }

    pub async fn read(
        &self,
        sandbox: &SandboxHandle,
        path: &str,
    ) -> Result<FileContent, FileOpError> {
        let path = resolve_path(sandbox, path);
        let out = self
            .platform
            .exec(sandbox, argv(["cat", "--", path.as_str()]))
            .await?;

        if !out.success() {
            return Err(FileOpError::ReadFailed(out.stderr_lossy().trim().to_string()));
        }

        let (content, truncated) = truncate_chars(&out.stdout_lossy(), self.limits.read_chars);
        Ok(FileContent { content, truncated })
    }

    /// Writes `content` byte-for-byte and returns the size measured inside the
    /// sandbox afterwards.
    pub async fn write(
        &self,
        sandbox: &SandboxHandle,
        path: &str,
        content: &str,
    ) -> Result<u64, FileOpError> {
        let path = resolve_path(sandbox, path);

        // 1. parent directory
        let parent = parent_dir(&path);
        let mkdir = self
            .platform
            .exec(sandbox, argv(["mkdir", "-p", "--", parent.as_str()]))
            .await?;
        if !mkdir.success() {
            return Err(FileOpError::CreateParentFailed(
                mkdir.stderr_lossy().trim().to_string(),
            ));
        }

        // 2. transfer as base64, decoded inside the sandbox
        let encoded = BASE64_STANDARD.encode(content.as_bytes());
        let staging = format!("/tmp/.diffbox-upload-{}.b64", Uuid::new_v4());
        if let Err(e) = self.upload(sandbox, &staging, &encoded, &path).await {
            let _ = self
                .platform
                .exec(sandbox, argv(["rm", "-f", "--", staging.as_str()]))
                .await;
            return Err(e);
        }

        // 3. verify
        let stat = self
            .platform
            .exec(sandbox, argv(["stat", "-c", "%s", "--", path.as_str()]))
            .await?;
        if !stat.success() {
            return Err(FileOpError::VerifyFailed(stat.stderr_lossy().trim().to_string()));
        }
        let actual: u64 = stat
            .stdout_lossy()
            .trim()
            .parse()
            .map_err(|_| FileOpError::VerifyFailed(format!("unexpected size output for {path}")))?;

        let expected = content.len() as u64;
        if actual != expected {
            warn!(
                sandbox_id = %sandbox.id,
                "Write to {} produced {} bytes, expected {}", path, actual, expected
            );
            return Err(FileOpError::SizeMismatch { expected, actual });
        }

        info!(sandbox_id = %sandbox.id, "Wrote {} bytes to {}", actual, path);
        Ok(actual)
    }

    async fn upload(
        &self,
        sandbox: &SandboxHandle,
        staging: &str,
        encoded: &str,
        target: &str,
    ) -> Result<(), FileOpError> {
        // base64 output is ASCII, so byte chunks are valid str slices
        let chunks: Vec<&str> = if encoded.is_empty() {
            vec![""]
        } else {
            encoded
                .as_bytes()
                .chunks(UPLOAD_CHUNK_CHARS)
                .map(|c| std::str::from_utf8(c).unwrap_or_default())
                .collect()
        };

        for (idx, chunk) in chunks.iter().enumerate() {
            let script = if idx == 0 {
                UPLOAD_FIRST_CHUNK
            } else {
                UPLOAD_NEXT_CHUNK
            };
            let out = self
                .platform
                .exec(sandbox, bash_script(script, [staging, *chunk]))
                .await?;
            if !out.success() {
                return Err(FileOpError::WriteFailed(out.stderr_lossy().trim().to_string()));
            }
        }

        let out = self
            .platform
            .exec(sandbox, bash_script(UPLOAD_DECODE, [staging, target]))
            .await?;
        if !out.success() {
            return Err(FileOpError::WriteFailed(out.stderr_lossy().trim().to_string()));
        }
        Ok(())
    }

    /// Directory entries, directories first, then by name in byte order.
    pub async fn list(
        &self,
        sandbox: &SandboxHandle,
        path: Option<&str>,
    ) -> Result<Vec<FileEntry>, FileOpError> {
        let dir = match path.filter(|p| !p.trim().is_empty()) {
            Some(p) => resolve_path(sandbox, p),
            None => sandbox.layout.workspace.clone(),
        };

        let out = self
            .platform
            .exec(sandbox, bash_script(LIST_DIR, [dir.as_str()]))
            .await?;
        if !out.success() {
            return Err(FileOpError::ListFailed(out.stderr_lossy().trim().to_string()));
        }

        let mut entries = parse_listing(&dir, &out.stdout)?;
        sort_entries(&mut entries);
        Ok(entries)
    }

    pub async fn delete(&self, sandbox: &SandboxHandle, path: &str) -> Result<(), FileOpError> {
        let resolved = resolve_path(sandbox, path);
        if is_protected(sandbox, path) || is_protected(sandbox, &resolved) {
            warn!(sandbox_id = %sandbox.id, "Refused to delete protected path {}", path);
            return Err(FileOpError::ProtectedPath(path.to_string()));
        }

        let out = self
            .platform
            .exec(sandbox, argv(["rm", "-rf", "--", resolved.as_str()]))
            .await?;
        if !out.success() {
            return Err(FileOpError::DeleteFailed(out.stderr_lossy().trim().to_string()));
        }

        info!(sandbox_id = %sandbox.id, "Deleted {}", resolved);
        Ok(())
    }

    pub async fn rename(
        &self,
        sandbox: &SandboxHandle,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), FileOpError> {
        let old_resolved = resolve_path(sandbox, old_path);
        let new_resolved = resolve_path(sandbox, new_path);
        if is_protected(sandbox, old_path) || is_protected(sandbox, &old_resolved) {
            return Err(FileOpError::ProtectedPath(old_path.to_string()));
        }

        let parent = parent_dir(&new_resolved);
        let mkdir = self
            .platform
            .exec(sandbox, argv(["mkdir", "-p", "--", parent.as_str()]))
            .await?;
        if !mkdir.success() {
            return Err(FileOpError::CreateParentFailed(
                mkdir.stderr_lossy().trim().to_string(),
            ));
        }

        let out = self
            .platform
            .exec(
                sandbox,
                argv(["mv", "--", old_resolved.as_str(), new_resolved.as_str()]),
            )
            .await?;
        if !out.success() {
            return Err(FileOpError::RenameFailed(out.stderr_lossy().trim().to_string()));
        }

        info!(sandbox_id = %sandbox.id, "Renamed {} -> {}", old_resolved, new_resolved);
        Ok(())
    }
}

/// Relative paths are taken relative to the workspace.
pub fn resolve_path(sandbox: &SandboxHandle, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        join_path(&sandbox.layout.workspace, path)
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Plain string comparison against the workspace and sandbox roots. This is a
/// guard against wiping the sandbox by accident, not a traversal defense.
fn is_protected(sandbox: &SandboxHandle, path: &str) -> bool {
    let trimmed = match path.trim_end_matches('/') {
        "" if path.starts_with('/') => "/",
        other => other,
    };
    let workspace = sandbox.layout.workspace.trim_end_matches('/');
    let root = match sandbox.layout.root.trim_end_matches('/') {
        "" => "/",
        other => other,
    };
    trimmed == workspace || trimmed == root || trimmed == "/"
}

fn parse_listing(dir: &str, raw: &[u8]) -> Result<Vec<FileEntry>, FileOpError> {
    let mut fields: Vec<&[u8]> = raw.split(|b| *b == 0).collect();
    // output ends with a NUL, leaving one empty trailing field
    if fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    if fields.len() % 3 != 0 {
        return Err(FileOpError::ListParse(format!(
            "expected records of 3 fields, got {} fields",
            fields.len()
        )));
    }

    fields
        .chunks(3)
        .map(|record| {
            let kind = match record[0] {
                b"d" => FileKind::Directory,
                _ => FileKind::File,
            };
            let size_bytes = std::str::from_utf8(record[1])
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    FileOpError::ListParse(format!(
                        "invalid size field {:?}",
                        String::from_utf8_lossy(record[1])
                    ))
                })?;
            let name = String::from_utf8_lossy(record[2]).into_owned();
            if name.is_empty() {
                return Err(FileOpError::ListParse("empty file name".to_string()));
            }
            Ok(FileEntry {
                path: join_path(dir, &name),
                name,
                kind,
                size_bytes,
            })
        })
        .filter(|entry| {
            !matches!(entry, Ok(FileEntry { name, .. }) if name == "." || name == "..")
        })
        .collect()
}

fn sort_entries(entries: &mut [FileEntry]) {
    entries.sort_by(|a, b| {
        let rank = |e: &FileEntry| match e.kind {
            FileKind::Directory => 0,
            FileKind::File => 1,
        };
        // Byte order within each group: uppercase sorts ahead of lowercase
        rank(a).cmp(&rank(b)).then_with(|| a.name.cmp(&b.name))
    });
}
