//! Per-sandbox capability token.
//!
//! The gateway keeps no session table, so the token lives inside the sandbox
//! it guards. It authorizes calls against this gateway's API only; anything
//! that can already run commands in the sandbox can read it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::platform::{argv, bash_script, PlatformError, SandboxHandle, SandboxPlatform};

const TOKEN_BYTES: usize = 32;

// umask keeps the file private from the moment it is created
const WRITE_TOKEN_SCRIPT: &str = r#"umask 077 && mkdir -p -- "$(dirname -- "$1")" && printf '%s' "$2" > "$1" && chmod 600 -- "$1""#;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to write owner token: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

#[derive(Clone)]
pub struct OwnerTokenAuthority {
    platform: Arc<dyn SandboxPlatform>,
}

impl OwnerTokenAuthority {
    pub fn new(platform: Arc<dyn SandboxPlatform>) -> Self {
        Self { platform }
    }

    /// Generates the sandbox's one and only token and stores it in the
    /// sandbox. The returned plaintext is handed to the creator and never
    /// transmitted again.
    pub async fn issue(&self, sandbox: &SandboxHandle) -> Result<String, TokenError> {
        let token = generate_token();
        let out = self
            .platform
            .exec(
                sandbox,
                bash_script(
                    WRITE_TOKEN_SCRIPT,
                    [sandbox.layout.owner_token_path.as_str(), token.as_str()],
                ),
            )
            .await?;

        if !out.success() {
            return Err(TokenError::WriteFailed(out.stderr_lossy().trim().to_string()));
        }

        info!(sandbox_id = %sandbox.id, "Issued owner token");
        Ok(token)
    }

    /// Any failure to read the stored token counts as "not authorized".
    pub async fn validate(&self, sandbox: &SandboxHandle, provided: &str) -> bool {
        if provided.is_empty() {
            return false;
        }

        let read = self
            .platform
            .exec(
                sandbox,
                argv(["cat", "--", sandbox.layout.owner_token_path.as_str()]),
            )
            .await;

        match read {
            Ok(out) if out.success() && !out.stdout.is_empty() => {
                constant_time_eq(&out.stdout, provided.as_bytes())
            }
            Ok(_) => {
                warn!(sandbox_id = %sandbox.id, "Owner token file missing or unreadable");
                false
            }
            Err(e) => {
                warn!(sandbox_id = %sandbox.id, "Failed to read owner token: {}", e);
                false
            }
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compares fixed-size digests so neither content nor length leaks through
/// timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let da = Sha256::digest(a);
    let db = Sha256::digest(b);
    da.iter().zip(db.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::local_platform::LocalPlatform;

    fn authority() -> (tempfile::TempDir, Arc<dyn SandboxPlatform>, OwnerTokenAuthority) {
        let dir = tempfile::tempdir().unwrap();
        let platform: Arc<dyn SandboxPlatform> =
            Arc::new(LocalPlatform::new(dir.path().to_path_buf(), 30));
        let authority = OwnerTokenAuthority::new(platform.clone());
        (dir, platform, authority)
    }

    #[test]
    fn tokens_are_url_safe_and_long() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn constant_time_eq_matches_plain_equality() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"", b"a"));
    }

    #[tokio::test]
    async fn issued_token_validates() {
        let (_dir, platform, authority) = authority();
        let sandbox = platform.provision().await.unwrap();

        let token = authority.issue(&sandbox).await.unwrap();
        assert!(authority.validate(&sandbox, &token).await);
    }

    #[tokio::test]
    async fn one_character_difference_is_rejected() {
        let (_dir, platform, authority) = authority();
        let sandbox = platform.provision().await.unwrap();
        let token = authority.issue(&sandbox).await.unwrap();

        let mut tampered: Vec<char> = token.chars().collect();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = tampered.into_iter().collect();

        assert!(!authority.validate(&sandbox, &tampered).await);
        assert!(!authority.validate(&sandbox, "").await);
        assert!(!authority.validate(&sandbox, &format!("{token} ")).await);
    }

    #[tokio::test]
    async fn missing_token_file_never_validates() {
        let (_dir, platform, authority) = authority();
        let sandbox = platform.provision().await.unwrap();
        assert!(!authority.validate(&sandbox, "anything").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, platform, authority) = authority();
        let sandbox = platform.provision().await.unwrap();
        authority.issue(&sandbox).await.unwrap();

        let mode = std::fs::metadata(&sandbox.layout.owner_token_path)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
